use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameDestination, FrameHeader, TxId};
use crate::common::function::FunctionCode;
use crate::common::phys::format_bytes;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    // cannot be < 1 b/c of the unit identifier
    pub(crate) const MAX_LENGTH_FIELD: usize =
        crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MbapHeader {
    tx_id: TxId,
    len_field: u16,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    // header and the ADU length
    Header(MbapHeader, usize),
}

/// incremental parser for MBAP frames
pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }

    // returns some header fields and the length of the ADU
    fn parse_header(cursor: &mut ReadBuffer) -> Result<(MbapHeader, usize), RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let len_field = cursor.read_u16_be()?;
        let length = len_field as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::FrameLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // The ADU length is the function code + body
        // It must be > 0 b/c the 1-byte unit identifier counts towards the length field
        let adu_length = length
            .checked_sub(1)
            .ok_or(FrameParseError::MbapLengthZero)?;

        Ok((
            MbapHeader {
                tx_id,
                len_field,
                unit_id,
            },
            adu_length,
        ))
    }

    fn parse_body(
        header: &MbapHeader,
        adu_length: usize,
        cursor: &mut ReadBuffer,
    ) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp(
            FrameDestination::new(header.unit_id),
            header.tx_id,
        ));
        frame.set(cursor.read(adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header, adu_length) => {
                if cursor.len() < adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, adu_length, cursor)?;
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode_level, header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                let (header, adu_len) = Self::parse_header(cursor)?;
                self.state = ParseState::Header(header, adu_len);
                self.parse(cursor, decode_level)
            }
        }
    }
}

pub(crate) fn format_mbap(
    buffer: &mut [u8],
    header: FrameHeader,
    function: FunctionCode,
    msg: &dyn Serialize,
    decode_level: FrameDecodeLevel,
) -> Result<usize, RequestError> {
    // always present in MBAP mode by construction
    let tx_id = match header.tx_id {
        Some(tx_id) => tx_id,
        None => return Err(crate::error::InternalError::BadSeekOperation.into()),
    };

    let unit_id = header.destination.into_unit_id();

    let mut cursor = WriteCursor::new(buffer);

    cursor.write_u16_be(tx_id.to_u16())?;
    cursor.write_u16_be(0)?; // protocol id
    let len_pos = cursor.position();
    cursor.skip(2)?; // the length is written afterwards
    cursor.write_u8(unit_id.value)?;

    let start_pdu = cursor.position();
    cursor.write_u8(function.get_value())?;
    msg.serialize(&mut cursor)?;
    let end_pdu = cursor.position();

    // the length field includes the unit identifier
    let len_field = (end_pdu - start_pdu + 1) as u16;

    cursor.seek_to(len_pos)?;
    cursor.write_u16_be(len_field)?;
    cursor.seek_to(end_pdu)?;

    if decode_level.enabled() {
        let mbap = MbapHeader {
            tx_id,
            len_field,
            unit_id,
        };
        tracing::info!(
            "MBAP TX - {}",
            MbapDisplay::new(decode_level, mbap, &buffer[start_pdu..end_pdu])
        );
    }

    Ok(end_pdu)
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: MbapHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: MbapHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id, self.header.unit_id, self.header.len_field
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use crate::common::frame::{FramedReader, FrameWriter};
    use crate::common::phys::PhysLayer;
    use crate::decode::DecodeLevel;

    use super::*;

    //                            |   tx id  |  proto id |  length  | unit | fc | body      |
    const SIMPLE_FRAME: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x04, 0x2A, 0x01, 0xCA, 0xFE];

    struct MockBody {
        body: &'static [u8],
    }

    impl Serialize for MockBody {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            for b in self.body {
                cursor.write_u8(*b)?;
            }
            Ok(())
        }
    }

    fn parse_frame(chunks: &[&[u8]]) -> Result<Frame, RequestError> {
        let mut reader = FramedReader::tcp();
        let (io, mut handle) = crate::mock::mock();
        let mut layer = PhysLayer::new_mock(io);
        let mut task =
            tokio_test::task::spawn(reader.next_frame(&mut layer, DecodeLevel::nothing()));

        for chunk in chunks {
            assert!(task.poll().is_pending());
            handle.read(chunk);
        }
        match task.poll() {
            Poll::Ready(x) => x,
            Poll::Pending => panic!("parser did not complete"),
        }
    }

    fn assert_equals_simple_frame(frame: &Frame) {
        assert_eq!(frame.header.tx_id, Some(TxId::new(0x0007)));
        assert_eq!(
            frame.header.destination,
            FrameDestination::UnitId(UnitId::new(0x2A))
        );
        assert_eq!(frame.payload(), &[0x01, 0xCA, 0xFE]);
    }

    #[test]
    fn correctly_formats_frame() {
        let mut writer = FrameWriter::tcp();
        let mut tx_id = TxId::new(7);
        let header = writer.next_header(FrameDestination::new(UnitId::new(42)), &mut tx_id);
        let msg = MockBody {
            body: &[0xCA, 0xFE],
        };
        let bytes = writer
            .format(header, FunctionCode::ReadCoils, &msg, DecodeLevel::nothing())
            .unwrap();
        assert_eq!(bytes, SIMPLE_FRAME)
    }

    #[test]
    fn can_parse_frame_from_stream() {
        let frame = parse_frame(&[SIMPLE_FRAME]).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_header() {
        let (f1, f2) = SIMPLE_FRAME.split_at(4);
        let frame = parse_frame(&[f1, f2]).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_payload() {
        let (f1, f2) = SIMPLE_FRAME.split_at(8);
        let frame = parse_frame(&[f1, f2]).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_maximum_size_frame() {
        // maximum ADU length is 253, so the max MBAP length value is 254 which is 0xFE
        let header = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFE, 0x2A];
        let payload = &[0xCC; 253];

        let frame = parse_frame(&[header, payload]).unwrap();
        assert_eq!(frame.payload(), payload.as_ref());
    }

    #[test]
    fn errors_on_bad_protocol_id() {
        let frame = &[0x00, 0x07, 0xCA, 0xFE, 0x00, 0x01, 0x2A];
        assert_eq!(
            parse_frame(&[frame]).unwrap_err(),
            RequestError::BadFrame(FrameParseError::UnknownProtocolId(0xCAFE)),
        );
    }

    #[test]
    fn errors_on_length_of_zero() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert_eq!(
            parse_frame(&[frame]).unwrap_err(),
            RequestError::BadFrame(FrameParseError::MbapLengthZero)
        );
    }

    #[test]
    fn errors_when_mbap_length_too_big() {
        let frame = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFF, 0x2A];
        assert_eq!(
            parse_frame(&[frame]).unwrap_err(),
            RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                0xFF,
                constants::MAX_LENGTH_FIELD,
            ))
        );
    }
}
