use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::error::RequestError;

/// Serialize a request body (everything after the function code) into a
/// write cursor
pub(crate) trait Serialize {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}

/// Parse a value from a read cursor
pub(crate) trait Parse: Sized {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError>;
}
