use crate::exception::ExceptionCode;

/// Error type returned for every request operation on a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying stream
    Io(std::io::ErrorKind),
    /// The server responded with an exception PDU
    Exception(ExceptionCode),
    /// No response was received from the server within the configured timeout,
    /// including after any configured retries
    ResponseTimeout,
    /// The request parameters are invalid
    BadRequest(InvalidRequest),
    /// Unable to parse a frame off the wire
    BadFrame(FrameParseError),
    /// The response ADU was invalid
    BadResponse(AduParseError),
    /// An unspecified internal error occurred while serializing the request
    Internal(InternalError),
    /// The channel is not open, the request was discarded
    NoConnection,
    /// The channel task has been shut down
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::Exception(err) => write!(f, "modbus exception: {err}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response from the server")
            }
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::NoConnection => f.write_str("no connection exists to the Modbus server"),
            RequestError::Shutdown => f.write_str("the channel task has been shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(err: ExceptionCode) -> Self {
        RequestError::Exception(err)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(InvalidRequest::BadRange(err))
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

/// Indicates that the channel task has terminated and can no longer be reached
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown;

impl std::error::Error for Shutdown {}

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("the channel task has been shut down")
    }
}

/// Errors that can occur while validating an address range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// Range count is zero
    CountOfZero,
    /// Start and count would overflow the u16 address space
    AddressOverflow(u16, u16),
    /// Count exceeds the maximum allowed for this request type
    CountTooLargeForType(u16, u16), // actual and limit
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains a count of zero"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the representation of u16"
            ),
            InvalidRange::CountTooLargeForType(count, max) => write!(
                f,
                "count of {count} exceeds the maximum allowed count of {max} for this request type"
            ),
        }
    }
}

/// Errors that result from invalid request parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// The address range is invalid
    BadRange(InvalidRange),
    /// The count of values does not fit into a u16
    CountTooBigForU16(usize),
    /// A read operation was addressed to the broadcast address, which can
    /// never produce a response
    BroadcastRead,
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::BadRange(err) => write!(f, "{err}"),
            InvalidRequest::CountTooBigForU16(count) => {
                write!(f, "count of {count} exceeds the maximum value of u16")
            }
            InvalidRequest::BroadcastRead => {
                f.write_str("read operations cannot be addressed to the broadcast address")
            }
        }
    }
}

/// Errors that occur while parsing a frame off a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received an MBAP frame with the length field set to zero
    MbapLengthZero,
    /// Received a frame with a length that exceeds the maximum allowed size
    FrameLengthTooBig(usize, usize), // actual size and the maximum size
    /// Received an MBAP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Received a frame with an unknown function code, so its length cannot
    /// be determined
    UnknownFunctionCode(u8),
    /// The CRC at the end of an RTU frame does not match the frame contents
    CrcValidationFailure(u16, u16), // received and expected
    /// The LRC at the end of an ASCII frame does not match the frame contents
    LrcValidationFailure(u8, u8), // received and expected
    /// An ASCII frame contains a character that is not a hexadecimal digit
    BadAsciiCharacter(u8),
    /// An ASCII frame contains an odd or too small number of hexadecimal digits
    BadAsciiFrameLength(usize),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received MBAP frame with the length field set to zero")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received frame with length ({size}) that exceeds the maximum allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received MBAP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "received unknown function code: {code:#04X}")
            }
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received CRC value {received:#06X} does not match the expected value {expected:#06X}"
            ),
            FrameParseError::LrcValidationFailure(received, expected) => write!(
                f,
                "received LRC value {received:#04X} does not match the expected value {expected:#04X}"
            ),
            FrameParseError::BadAsciiCharacter(ch) => {
                write!(f, "ASCII frame contains a non-hexadecimal character: {ch:#04X}")
            }
            FrameParseError::BadAsciiFrameLength(len) => {
                write!(f, "ASCII frame contains an invalid number of hexadecimal digits: {len}")
            }
        }
    }
}

/// Errors that occur while parsing requests and responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// The response is too short to be valid
    InsufficientBytes,
    /// The response contains extra trailing bytes
    TrailingBytes(usize),
    /// A parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// An unknown response function code was received
    UnknownResponseFunction(u8, u8, u8), // actual, expected, expected exception
    /// A coil state was not 0xFF00 or 0x0000
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing byte(s)")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, exception) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {exception}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

/// Errors that should never occur, but are preferable to a panic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to write more bytes than the buffer allows
    InsufficientWriteSpace(usize, usize), // written size and remaining space
    /// The calculated frame size exceeds what is allowed by the spec
    FrameTooBig(usize, usize), // calculated frame size and maximum allowed size
    /// Attempted to read more bytes than present
    InsufficientBytesForRead(usize, usize), // requested and remaining
    /// A cursor seek was performed outside the bounds of the underlying buffer
    BadSeekOperation,
    /// The byte count of a write payload would exceed the maximum size of a u8
    BadByteCount(usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(write_size, remaining) => write!(
                f,
                "attempted to write {write_size} byte(s) with only {remaining} byte(s) of space remaining"
            ),
            InternalError::FrameTooBig(size, max) => write!(
                f,
                "frame length of {size} exceeds the maximum allowed length of {max}"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} byte(s) with only {remaining} remaining"
            ),
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::BadByteCount(count) => {
                write!(f, "byte count would exceed the maximum size of u8: {count}")
            }
        }
    }
}
