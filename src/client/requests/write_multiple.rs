use crate::client::message::Promise;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::FunctionCode;
use crate::common::traits::{Parse, Serialize};
use crate::decode::AppDecodeLevel;
use crate::error::{AduParseError, InvalidRequest, RequestError};
use crate::types::AddressRange;

/// Collection of values and starting address
///
/// Used when making write multiple coil/register requests
#[derive(Debug, Clone, PartialEq)]
pub struct WriteMultiple<T> {
    pub(crate) range: AddressRange,
    pub(crate) values: Vec<T>,
}

impl<T> WriteMultiple<T> {
    /// Create a new collection of values from a starting address
    pub fn from(start: u16, values: Vec<T>) -> Result<Self, InvalidRequest> {
        let count = u16::try_from(values.len())
            .map_err(|_| InvalidRequest::CountTooBigForU16(values.len()))?;
        let range = AddressRange::try_from(start, count).map_err(InvalidRequest::BadRange)?;
        Ok(Self { range, values })
    }

    /// The range of addresses that will be written
    pub fn range(&self) -> AddressRange {
        self.range
    }
}

/// in-flight write multiple coils/registers request and its response channel
pub(crate) struct MultipleWrite<T>
where
    WriteMultiple<T>: Serialize,
{
    request: WriteMultiple<T>,
    promise: Promise<AddressRange>,
}

impl<T> MultipleWrite<T>
where
    WriteMultiple<T>: Serialize,
{
    pub(crate) fn new(request: WriteMultiple<T>, promise: Promise<AddressRange>) -> Self {
        Self { request, promise }
    }

    pub(crate) fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.request.serialize(cursor)
    }

    pub(crate) fn failure(self, err: RequestError) {
        self.promise.failure(err)
    }

    /// broadcast writes complete as soon as the frame is on the wire
    pub(crate) fn complete_broadcast(self) {
        let range = self.request.range;
        self.promise.success(range)
    }

    pub(crate) fn handle_response(
        self,
        mut cursor: ReadCursor,
        function: FunctionCode,
        decode: AppDecodeLevel,
    ) {
        match Self::parse_echo(self.request.range, &mut cursor) {
            Ok(range) => {
                if decode.enabled() {
                    tracing::info!("PDU RX - {} {}", function, range);
                }
                self.promise.success(range)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                self.promise.failure(err)
            }
        }
    }

    fn parse_echo(request: AddressRange, cursor: &mut ReadCursor) -> Result<AddressRange, RequestError> {
        let range = AddressRange::parse(cursor)?;
        cursor.expect_empty()?;
        if range != request {
            return Err(AduParseError::ReplyEchoMismatch.into());
        }
        Ok(range)
    }
}
