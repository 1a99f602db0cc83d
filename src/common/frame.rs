use crate::common::buffer::ReadBuffer;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::serial::frame::{AsciiParser, RtuParser};
use crate::tcp::frame::MbapParser;
use crate::types::UnitId;

pub(crate) mod constants {
    /// the maximum size of a PDU (function code + data)
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
    /// the maximum wire size of any frame in any transfer mode.
    ///
    /// ASCII is the worst case: start delimiter, two hex characters for every
    /// byte of (unit id + ADU + LRC), and the CR LF terminator.
    pub(crate) const MAX_FRAME_LENGTH: usize = 1 + 2 * (1 + MAX_ADU_LENGTH + 1) + 2;
}

/// transaction identifier used by the MBAP header
#[derive(PartialEq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = self.value.wrapping_add(1);
        TxId::new(ret)
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// where a request is headed: a particular server or every server on the line
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum FrameDestination {
    /// a response is expected from this server
    UnitId(UnitId),
    /// each server processes the request, none of them responds
    Broadcast,
}

impl FrameDestination {
    pub(crate) fn new(unit_id: UnitId) -> Self {
        if unit_id.is_broadcast() {
            FrameDestination::Broadcast
        } else {
            FrameDestination::UnitId(unit_id)
        }
    }

    pub(crate) fn into_unit_id(self) -> UnitId {
        match self {
            FrameDestination::UnitId(id) => id,
            FrameDestination::Broadcast => UnitId::broadcast(),
        }
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        matches!(self, FrameDestination::Broadcast)
    }
}

impl std::fmt::Display for FrameDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameDestination::UnitId(id) => write!(f, "{id}"),
            FrameDestination::Broadcast => f.write_str("BROADCAST"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct FrameHeader {
    pub(crate) destination: FrameDestination,
    /// transaction id, present only in MBAP mode
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp(destination: FrameDestination, tx_id: TxId) -> Self {
        FrameHeader {
            destination,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_serial(destination: FrameDestination) -> Self {
        FrameHeader {
            destination,
            tx_id: None,
        }
    }
}

/// a fully parsed frame: the source/destination header and the raw PDU bytes
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    adu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            adu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.adu.len() {
            return false;
        }

        self.adu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.adu[0..self.length]
    }
}

/// formats frames for one of the three transfer modes into an internal buffer
pub(crate) struct FrameWriter {
    mode: WireMode,
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum WireMode {
    Rtu,
    Ascii,
    Tcp,
}

impl FrameWriter {
    fn new(mode: WireMode) -> Self {
        Self {
            mode,
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn rtu() -> Self {
        Self::new(WireMode::Rtu)
    }

    pub(crate) fn ascii() -> Self {
        Self::new(WireMode::Ascii)
    }

    pub(crate) fn tcp() -> Self {
        Self::new(WireMode::Tcp)
    }

    /// build the header for the next request, consuming a transaction id
    /// only in a mode that puts one on the wire
    pub(crate) fn next_header(
        &self,
        destination: FrameDestination,
        tx_id: &mut TxId,
    ) -> FrameHeader {
        match self.mode {
            WireMode::Tcp => FrameHeader::new_tcp(destination, tx_id.next()),
            WireMode::Rtu | WireMode::Ascii => FrameHeader::new_serial(destination),
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        body: &dyn Serialize,
        decode: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        let count = match self.mode {
            WireMode::Rtu => {
                crate::serial::frame::format_rtu(&mut self.buffer, header, function, body, decode.frame)?
            }
            WireMode::Ascii => {
                crate::serial::frame::format_ascii(&mut self.buffer, header, function, body, decode.frame)?
            }
            WireMode::Tcp => {
                crate::tcp::frame::format_mbap(&mut self.buffer, header, function, body, decode.frame)?
            }
        };
        Ok(&self.buffer[..count])
    }
}

enum Parser {
    Rtu(RtuParser),
    Ascii(AsciiParser),
    Tcp(MbapParser),
}

/// reads complete frames off the physical layer, one transfer mode at a time
pub(crate) struct FramedReader {
    parser: Parser,
    buffer: ReadBuffer,
}

impl FramedReader {
    fn new(parser: Parser) -> Self {
        Self {
            parser,
            buffer: ReadBuffer::new(constants::MAX_FRAME_LENGTH),
        }
    }

    pub(crate) fn rtu() -> Self {
        Self::new(Parser::Rtu(RtuParser::new_response_parser()))
    }

    pub(crate) fn ascii() -> Self {
        Self::new(Parser::Ascii(AsciiParser::new()))
    }

    pub(crate) fn tcp() -> Self {
        Self::new(Parser::Tcp(MbapParser::new()))
    }

    /// discard any partially accumulated input and re-synchronize the parser.
    ///
    /// Called between transactions so that unsolicited or leftover bytes can
    /// never be attributed to the next response.
    pub(crate) fn reset(&mut self) {
        let discarded = self.buffer.discard_contents();
        if discarded > 0 {
            tracing::warn!("discarded {} unsolicited byte(s)", discarded);
        }
        match &mut self.parser {
            Parser::Rtu(x) => x.reset(),
            Parser::Ascii(x) => x.reset(),
            Parser::Tcp(x) => x.reset(),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            let result = match &mut self.parser {
                Parser::Rtu(x) => x.parse(&mut self.buffer, decode.frame)?,
                Parser::Ascii(x) => x.parse(&mut self.buffer, decode.frame)?,
                Parser::Tcp(x) => x.parse(&mut self.buffer, decode.frame)?,
            };
            match result {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, decode.physical).await?;
                }
            }
        }
    }
}
