use std::time::Duration;

use tokio::sync::oneshot;

use crate::client::requests::read_bits::ReadBits;
use crate::client::requests::read_registers::ReadRegisters;
use crate::client::requests::read_write_registers::ReadWriteMultiple;
use crate::client::requests::write_multiple::MultipleWrite;
use crate::client::requests::write_single::SingleWrite;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::frame::FrameDestination;
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::decode::{AppDecodeLevel, DecodeLevel};
use crate::error::{AduParseError, RequestError, Shutdown};
use crate::exception::ExceptionCode;
use crate::types::{Indexed, UnitId};

/// wraps a tokio receiver and only provides a recv() that returns
/// Result<T, Shutdown>, which makes it harder to misuse
pub(crate) struct Receiver<T>(tokio::sync::mpsc::Receiver<T>);

impl<T> From<tokio::sync::mpsc::Receiver<T>> for Receiver<T> {
    fn from(value: tokio::sync::mpsc::Receiver<T>) -> Self {
        Self(value)
    }
}

impl<T> Receiver<T> {
    pub(crate) async fn recv(&mut self) -> Result<T, Shutdown> {
        self.0.recv().await.ok_or(Shutdown)
    }
}

/// how the result of an operation travels back to the caller
pub(crate) struct Promise<T> {
    sender: oneshot::Sender<Result<T, RequestError>>,
}

impl<T> Promise<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<T, RequestError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { sender: tx }, rx)
    }

    pub(crate) fn complete(self, result: Result<T, RequestError>) {
        // the caller may have stopped waiting, which is not an error here
        self.sender.send(result).ok();
    }

    pub(crate) fn success(self, value: T) {
        self.complete(Ok(value))
    }

    pub(crate) fn failure(self, err: RequestError) {
        self.complete(Err(err))
    }
}

/// everything that can travel through the channel's command queue
pub(crate) enum Command {
    /// a request to execute on the wire
    Request(Request),
    /// a runtime-adjustable setting, ordered with respect to requests
    Setting(Setting),
}

pub(crate) enum Setting {
    DecodeLevel(DecodeLevel),
    ResponseTimeout(Duration),
    RetryTimes(usize),
    FrameInterval(Duration),
    TurnaroundDelay(Duration),
    Enabled(bool),
}

/// all the information the channel task needs to process a request
pub(crate) struct Request {
    pub(crate) id: UnitId,
    pub(crate) details: RequestDetails,
}

/// per-function-code request payload and typed completion path
pub(crate) enum RequestDetails {
    ReadCoils(ReadBits),
    ReadDiscreteInputs(ReadBits),
    ReadHoldingRegisters(ReadRegisters),
    ReadInputRegisters(ReadRegisters),
    WriteSingleCoil(SingleWrite<Indexed<bool>>),
    WriteSingleRegister(SingleWrite<Indexed<u16>>),
    WriteMultipleCoils(MultipleWrite<bool>),
    WriteMultipleRegisters(MultipleWrite<u16>),
    ReadWriteMultipleRegisters(ReadWriteMultiple),
}

impl Request {
    pub(crate) fn new(id: UnitId, details: RequestDetails) -> Self {
        Self { id, details }
    }

    pub(crate) fn destination(&self) -> FrameDestination {
        FrameDestination::new(self.id)
    }

    pub(crate) fn fail(self, err: RequestError) {
        self.details.fail(err)
    }

    /// decode a complete response PDU (function code + data) and deliver
    /// the typed result
    pub(crate) fn handle_response(self, payload: &[u8], decode: AppDecodeLevel) {
        let expected = self.details.function();
        let mut cursor = ReadCursor::new(payload);

        let function = match cursor.read_u8() {
            Ok(x) => x,
            Err(err) => return self.details.fail(err.into()),
        };

        if function == expected.get_value() {
            return self.details.handle_response(cursor, decode);
        }

        if function == expected.as_error() {
            // exception PDU, a single byte of exception code follows
            let exception = match cursor.read_u8() {
                Ok(code) => ExceptionCode::from(code),
                Err(err) => return self.details.fail(err.into()),
            };
            if decode.enabled() {
                tracing::warn!("PDU RX - {} ({})", expected, exception);
            }
            return self.details.fail(exception.into());
        }

        self.details.fail(
            AduParseError::UnknownResponseFunction(
                function,
                expected.get_value(),
                expected.as_error(),
            )
            .into(),
        )
    }
}

impl RequestDetails {
    pub(crate) fn function(&self) -> FunctionCode {
        match self {
            RequestDetails::ReadCoils(_) => FunctionCode::ReadCoils,
            RequestDetails::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            RequestDetails::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            RequestDetails::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            RequestDetails::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            RequestDetails::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            RequestDetails::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            RequestDetails::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            RequestDetails::ReadWriteMultipleRegisters(_) => {
                FunctionCode::ReadWriteMultipleRegisters
            }
        }
    }

    pub(crate) fn fail(self, err: RequestError) {
        match self {
            RequestDetails::ReadCoils(x) => x.failure(err),
            RequestDetails::ReadDiscreteInputs(x) => x.failure(err),
            RequestDetails::ReadHoldingRegisters(x) => x.failure(err),
            RequestDetails::ReadInputRegisters(x) => x.failure(err),
            RequestDetails::WriteSingleCoil(x) => x.failure(err),
            RequestDetails::WriteSingleRegister(x) => x.failure(err),
            RequestDetails::WriteMultipleCoils(x) => x.failure(err),
            RequestDetails::WriteMultipleRegisters(x) => x.failure(err),
            RequestDetails::ReadWriteMultipleRegisters(x) => x.failure(err),
        }
    }

    /// complete a broadcast request after the turnaround delay.
    ///
    /// Writes resolve with the echoed request. Read operations are rejected at
    /// the channel boundary before they get here, but fail defensively.
    pub(crate) fn complete_broadcast(self) {
        match self {
            RequestDetails::WriteSingleCoil(x) => x.complete_broadcast(),
            RequestDetails::WriteSingleRegister(x) => x.complete_broadcast(),
            RequestDetails::WriteMultipleCoils(x) => x.complete_broadcast(),
            RequestDetails::WriteMultipleRegisters(x) => x.complete_broadcast(),
            other => other.fail(crate::error::InvalidRequest::BroadcastRead.into()),
        }
    }

    fn handle_response(self, cursor: ReadCursor, decode: AppDecodeLevel) {
        let function = self.function();
        match self {
            RequestDetails::ReadCoils(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadDiscreteInputs(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadHoldingRegisters(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadInputRegisters(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteSingleCoil(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteSingleRegister(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteMultipleCoils(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteMultipleRegisters(x) => {
                x.handle_response(cursor, function, decode)
            }
            RequestDetails::ReadWriteMultipleRegisters(x) => {
                x.handle_response(cursor, function, decode)
            }
        }
    }
}

impl Serialize for RequestDetails {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        match self {
            RequestDetails::ReadCoils(x) => x.serialize(cursor),
            RequestDetails::ReadDiscreteInputs(x) => x.serialize(cursor),
            RequestDetails::ReadHoldingRegisters(x) => x.serialize(cursor),
            RequestDetails::ReadInputRegisters(x) => x.serialize(cursor),
            RequestDetails::WriteSingleCoil(x) => x.serialize(cursor),
            RequestDetails::WriteSingleRegister(x) => x.serialize(cursor),
            RequestDetails::WriteMultipleCoils(x) => x.serialize(cursor),
            RequestDetails::WriteMultipleRegisters(x) => x.serialize(cursor),
            RequestDetails::ReadWriteMultipleRegisters(x) => x.serialize(cursor),
        }
    }
}
