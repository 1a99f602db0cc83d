use crate::client::message::Promise;
use crate::client::requests::read_registers::parse_registers_response;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::decode::AppDecodeLevel;
use crate::error::{InvalidRequest, RequestError};
use crate::types::{AddressRange, Indexed, RegisterIteratorDisplay};

/// Parameters of a read/write multiple registers request: a range to read
/// and the values to write in the same transaction
///
/// The write is performed by the server before the read. The response has the
/// same format as a read holding registers response covering the read range.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadWriteRegisters {
    pub(crate) read_range: AddressRange,
    pub(crate) write_range: AddressRange,
    pub(crate) values: Vec<u16>,
}

impl ReadWriteRegisters {
    /// Create a new request from a read range, a write starting address, and
    /// the values to write
    pub fn new(
        read_range: AddressRange,
        write_start: u16,
        values: Vec<u16>,
    ) -> Result<Self, InvalidRequest> {
        let count = u16::try_from(values.len())
            .map_err(|_| InvalidRequest::CountTooBigForU16(values.len()))?;
        let write_range =
            AddressRange::try_from(write_start, count).map_err(InvalidRequest::BadRange)?;

        let read_range = read_range
            .limited_count(crate::constants::limits::MAX_READ_WRITE_REGISTERS_READ_COUNT)
            .map_err(InvalidRequest::BadRange)?;
        let write_range = write_range
            .limited_count(crate::constants::limits::MAX_READ_WRITE_REGISTERS_WRITE_COUNT)
            .map_err(InvalidRequest::BadRange)?;

        Ok(Self {
            read_range,
            write_range,
            values,
        })
    }

    /// The range of addresses that will be read
    pub fn read_range(&self) -> AddressRange {
        self.read_range
    }
}

/// in-flight read/write multiple registers request and its response channel
pub(crate) struct ReadWriteMultiple {
    request: ReadWriteRegisters,
    promise: Promise<Vec<Indexed<u16>>>,
}

impl ReadWriteMultiple {
    pub(crate) fn new(request: ReadWriteRegisters, promise: Promise<Vec<Indexed<u16>>>) -> Self {
        Self { request, promise }
    }

    pub(crate) fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.request.serialize(cursor)
    }

    pub(crate) fn failure(self, err: RequestError) {
        self.promise.failure(err)
    }

    pub(crate) fn handle_response(
        self,
        mut cursor: ReadCursor,
        function: FunctionCode,
        decode: AppDecodeLevel,
    ) {
        match parse_registers_response(self.request.read_range, &mut cursor) {
            Ok(iterator) => {
                if decode.enabled() {
                    tracing::info!(
                        "PDU RX - {} {}",
                        function,
                        RegisterIteratorDisplay::new(decode, iterator)
                    );
                }
                self.promise.success(iterator.collect())
            }
            Err(err) => {
                tracing::warn!("{}", err);
                self.promise.failure(err)
            }
        }
    }
}
