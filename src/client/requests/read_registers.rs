use crate::client::message::Promise;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::decode::AppDecodeLevel;
use crate::error::RequestError;
use crate::types::{
    AddressRange, Indexed, ReadRegistersRange, RegisterIterator, RegisterIteratorDisplay,
};

/// read holding/input registers request and its response channel
pub(crate) struct ReadRegisters {
    request: ReadRegistersRange,
    promise: Promise<Vec<Indexed<u16>>>,
}

impl ReadRegisters {
    pub(crate) fn new(request: ReadRegistersRange, promise: Promise<Vec<Indexed<u16>>>) -> Self {
        Self { request, promise }
    }

    pub(crate) fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.request.get().serialize(cursor)
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
        match parse_registers_response(self.request.get(), &mut cursor) {
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

/// shared with the read/write multiple registers response, which has the same
/// format as a read holding registers response
pub(crate) fn parse_registers_response<'a>(
    range: AddressRange,
    cursor: &mut ReadCursor<'a>,
) -> Result<RegisterIterator<'a>, RequestError> {
    // there's a byte-count here that we don't actually need
    cursor.read_u8()?;
    // the rest is a sequence of big-endian u16 values
    RegisterIterator::parse_all(range, cursor)
}
