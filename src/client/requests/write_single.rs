use std::fmt::Display;

use crate::client::message::Promise;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::FunctionCode;
use crate::common::traits::{Parse, Serialize};
use crate::decode::AppDecodeLevel;
use crate::error::{AduParseError, RequestError};

/// write single coil / write single register request and its response channel
///
/// The response is an echo of the request, so the parsed reply is checked
/// against what was sent.
pub(crate) struct SingleWrite<T>
where
    T: Serialize + Parse + Display + PartialEq + Copy,
{
    request: T,
    promise: Promise<T>,
}

impl<T> SingleWrite<T>
where
    T: Serialize + Parse + Display + PartialEq + Copy,
{
    pub(crate) fn new(request: T, promise: Promise<T>) -> Self {
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
        self.promise.success(self.request)
    }

    pub(crate) fn handle_response(
        self,
        mut cursor: ReadCursor,
        function: FunctionCode,
        decode: AppDecodeLevel,
    ) {
        match Self::parse_echo(self.request, &mut cursor) {
            Ok(echo) => {
                if decode.enabled() {
                    tracing::info!("PDU RX - {} {}", function, echo);
                }
                self.promise.success(echo)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                self.promise.failure(err)
            }
        }
    }

    fn parse_echo(request: T, cursor: &mut ReadCursor) -> Result<T, RequestError> {
        let echo = T::parse(cursor)?;
        cursor.expect_empty()?;
        if echo != request {
            return Err(AduParseError::ReplyEchoMismatch.into());
        }
        Ok(echo)
    }
}
