use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{constants, Frame, FrameDestination, FrameHeader};
use crate::common::function::FunctionCode;
use crate::common::phys::format_bytes;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod rtu_constants {
    pub(crate) const ADDRESS_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        ADDRESS_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// eight-bit two's-complement of the byte sum, appended to ASCII frames
pub(crate) fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(UnitId, usize),          // unit id, length of rest
    ReadToOffsetForLength(UnitId, usize), // unit id, offset of the length byte
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// the body length is always the same (not counting the function code)
    Fixed(usize),
    /// X more bytes are needed, and the last of them holds the count of
    /// additional bytes after that
    Offset(usize),
    /// unknown function code, the size cannot be determined
    Unknown,
}

/// incremental parser for RTU response frames
pub(crate) struct RtuParser {
    state: ParseState,
}

impl RtuParser {
    pub(crate) fn new_response_parser() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }

    // how to compute the response body length for each function code
    fn length_mode(function_code: u8) -> LengthMode {
        if function_code & 0x80 != 0 {
            // exception responses carry a single code byte
            return LengthMode::Fixed(1);
        }

        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match function_code {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters
            | FunctionCode::ReadWriteMultipleRegisters => LengthMode::Offset(1),
            FunctionCode::WriteSingleCoil
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleCoils
            | FunctionCode::WriteMultipleRegisters => LengthMode::Fixed(4),
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);
                // the function code is not consumed to avoid a copy later on
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match Self::length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => {
                        ParseState::ReadToOffsetForLength(unit_id, offset)
                    }
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(cursor, decode_level)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                if cursor.len() < rtu_constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                let extra_bytes_to_read =
                    cursor.peek_at(rtu_constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(cursor, decode_level)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                if rtu_constants::FUNCTION_CODE_LENGTH + length > constants::MAX_ADU_LENGTH {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        rtu_constants::FUNCTION_CODE_LENGTH + length,
                        constants::MAX_ADU_LENGTH,
                    )));
                }

                if cursor.len()
                    < rtu_constants::FUNCTION_CODE_LENGTH + length + rtu_constants::CRC_LENGTH
                {
                    return Ok(None);
                }

                let frame = {
                    let data = cursor.read(rtu_constants::FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_serial(FrameDestination::new(
                        unit_id,
                    )));
                    frame.set(data);
                    frame
                };
                let received_crc = cursor.read_u16_le()?;

                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[unit_id.value]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                if decode_level.enabled() {
                    tracing::info!(
                        "RTU RX - {}",
                        RtuDisplay::new(decode_level, unit_id, frame.payload(), received_crc)
                    );
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }
}

pub(crate) fn format_rtu(
    buffer: &mut [u8],
    header: FrameHeader,
    function: FunctionCode,
    msg: &dyn Serialize,
    decode_level: FrameDecodeLevel,
) -> Result<usize, RequestError> {
    let unit_id = header.destination.into_unit_id();

    let end_position = {
        let mut cursor = WriteCursor::new(buffer);

        cursor.write_u8(unit_id.value)?;
        cursor.write_u8(function.get_value())?;
        msg.serialize(&mut cursor)?;

        cursor.position()
    };

    if end_position + rtu_constants::CRC_LENGTH > rtu_constants::MAX_FRAME_LENGTH {
        return Err(crate::error::InternalError::FrameTooBig(
            end_position + rtu_constants::CRC_LENGTH,
            rtu_constants::MAX_FRAME_LENGTH,
        )
        .into());
    }

    let crc = CRC.checksum(&buffer[0..end_position]);

    {
        let mut cursor = WriteCursor::new(buffer);
        cursor.seek_to(end_position)?;
        cursor.write_u16_le(crc)?;
    }

    if decode_level.enabled() {
        tracing::info!(
            "RTU TX - {}",
            RtuDisplay::new(
                decode_level,
                unit_id,
                &buffer[rtu_constants::ADDRESS_LENGTH..end_position],
                crc
            )
        );
    }

    Ok(end_position + rtu_constants::CRC_LENGTH)
}

pub(crate) mod ascii_constants {
    pub(crate) const COLON: u8 = b':';
    pub(crate) const CR: u8 = b'\r';
    pub(crate) const LF: u8 = b'\n';
    /// unit id + function code + LRC is the smallest conceivable frame
    pub(crate) const MIN_HEX_DIGITS: usize = 6;
}

fn hex_char(value: u8) -> u8 {
    match value {
        0..=9 => b'0' + value,
        _ => b'A' + (value - 10),
    }
}

fn hex_value(ch: u8) -> Result<u8, FrameParseError> {
    match ch {
        b'0'..=b'9' => Ok(ch - b'0'),
        b'a'..=b'f' => Ok(ch - b'a' + 10),
        b'A'..=b'F' => Ok(ch - b'A' + 10),
        _ => Err(FrameParseError::BadAsciiCharacter(ch)),
    }
}

/// incremental parser for ASCII response frames
///
/// Unlike RTU, the framing is fully delimited so no per-function length
/// table is required. Noise preceding the start delimiter is discarded.
pub(crate) struct AsciiParser;

impl AsciiParser {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn reset(&mut self) {}

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        // discard anything preceding the start delimiter
        let mut skipped = 0;
        while !cursor.is_empty() && cursor.peek_at(0)? != ascii_constants::COLON {
            cursor.read_u8()?;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::warn!("discarded {} byte(s) preceding the ASCII start delimiter", skipped);
        }

        // locate the CR LF terminator
        let mut index = 1;
        loop {
            if index >= cursor.len() {
                if cursor.len() >= constants::MAX_FRAME_LENGTH {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        cursor.len(),
                        constants::MAX_FRAME_LENGTH,
                    )));
                }
                return Ok(None);
            }
            if cursor.peek_at(index)? == ascii_constants::CR {
                break;
            }
            index += 1;
        }
        if index + 1 >= cursor.len() {
            return Ok(None); // LF not received yet
        }
        let terminator = cursor.peek_at(index + 1)?;
        if terminator != ascii_constants::LF {
            return Err(RequestError::BadFrame(FrameParseError::BadAsciiCharacter(
                terminator,
            )));
        }

        let digits = index - 1;
        if digits % 2 != 0 || digits < ascii_constants::MIN_HEX_DIGITS {
            return Err(RequestError::BadFrame(FrameParseError::BadAsciiFrameLength(
                digits,
            )));
        }

        let byte_count = digits / 2; // unit id + PDU + LRC
        if byte_count - 2 > constants::MAX_ADU_LENGTH {
            return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                byte_count - 2,
                constants::MAX_ADU_LENGTH,
            )));
        }

        // the frame is complete, consume and decode it
        cursor.read_u8()?; // start delimiter
        let mut raw = [0u8; 256];
        for byte in raw.iter_mut().take(byte_count) {
            let high = hex_value(cursor.read_u8()?)?;
            let low = hex_value(cursor.read_u8()?)?;
            *byte = (high << 4) | low;
        }
        cursor.read(2)?; // CR LF

        let received_lrc = raw[byte_count - 1];
        let expected_lrc = lrc(&raw[..byte_count - 1]);
        if received_lrc != expected_lrc {
            return Err(RequestError::BadFrame(FrameParseError::LrcValidationFailure(
                received_lrc,
                expected_lrc,
            )));
        }

        let unit_id = UnitId::new(raw[0]);
        let mut frame = Frame::new(FrameHeader::new_serial(FrameDestination::new(unit_id)));
        frame.set(&raw[1..byte_count - 1]);

        if decode_level.enabled() {
            tracing::info!(
                "ASCII RX - {}",
                AsciiDisplay::new(decode_level, unit_id, frame.payload(), received_lrc)
            );
        }

        Ok(Some(frame))
    }
}

pub(crate) fn format_ascii(
    buffer: &mut [u8],
    header: FrameHeader,
    function: FunctionCode,
    msg: &dyn Serialize,
    decode_level: FrameDecodeLevel,
) -> Result<usize, RequestError> {
    let unit_id = header.destination.into_unit_id();

    // assemble the binary image first, then hex-encode it
    let mut binary = [0u8; 256];
    let length = {
        let mut cursor = WriteCursor::new(&mut binary);
        cursor.write_u8(unit_id.value)?;
        cursor.write_u8(function.get_value())?;
        msg.serialize(&mut cursor)?;
        cursor.position()
    };
    let lrc = lrc(&binary[..length]);

    let mut cursor = WriteCursor::new(buffer);
    cursor.write_u8(ascii_constants::COLON)?;
    for byte in binary[..length].iter().chain(std::iter::once(&lrc)) {
        cursor.write_u8(hex_char(byte >> 4))?;
        cursor.write_u8(hex_char(byte & 0x0F))?;
    }
    cursor.write_u8(ascii_constants::CR)?;
    cursor.write_u8(ascii_constants::LF)?;

    if decode_level.enabled() {
        tracing::info!(
            "ASCII TX - {}",
            AsciiDisplay::new(decode_level, unit_id, &binary[1..length], lrc)
        );
    }

    Ok(cursor.position())
}

struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    address: UnitId,
    data: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    fn new(level: FrameDecodeLevel, address: UnitId, data: &'a [u8], crc: u16) -> Self {
        RtuDisplay {
            level,
            address,
            data,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "address: {} crc: {:#06X} (len = {})",
            self.address,
            self.crc,
            self.data.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

struct AsciiDisplay<'a> {
    level: FrameDecodeLevel,
    address: UnitId,
    data: &'a [u8],
    lrc: u8,
}

impl<'a> AsciiDisplay<'a> {
    fn new(level: FrameDecodeLevel, address: UnitId, data: &'a [u8], lrc: u8) -> Self {
        AsciiDisplay {
            level,
            address,
            data,
            lrc,
        }
    }
}

impl std::fmt::Display for AsciiDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "address: {} lrc: {:#04X} (len = {})",
            self.address,
            self.lrc,
            self.data.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use crate::common::frame::{FramedReader, FrameWriter, TxId};
    use crate::common::phys::PhysLayer;
    use crate::decode::DecodeLevel;

    use super::*;

    // read coils response from unit 0x01: coils 0000 0101
    const RTU_RESPONSE_FRAME: &[u8] = &[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B];

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

    fn parse_frame(reader: &mut FramedReader, chunks: &[&[u8]]) -> Result<Frame, RequestError> {
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

    #[test]
    fn crc_of_frame_with_appended_crc_is_zero() {
        // property 1: crc16(b ∥ crc_lo ∥ crc_hi) == 0
        assert_eq!(CRC.checksum(RTU_RESPONSE_FRAME), 0);
        assert_eq!(
            CRC.checksum(&[0x01, 0x04, 0x02, 0xFF, 0xFF, 0xB8, 0x80]),
            0
        );
    }

    #[test]
    fn lrc_balances_the_byte_sum() {
        // property 2: (sum(b) + lrc(b)) mod 256 == 0
        for data in [
            &[0x01u8, 0x01, 0x00, 0x0A, 0x00, 0x03][..],
            &[0x01, 0x81, 0x02][..],
            &[0xFF, 0xFF, 0xFF][..],
        ] {
            let sum: u32 = data.iter().map(|x| *x as u32).sum();
            assert_eq!((sum + lrc(data) as u32) % 256, 0);
        }
    }

    #[test]
    fn formats_rtu_request_with_trailing_crc() {
        let mut writer = FrameWriter::rtu();
        let mut tx_id = TxId::default();
        let header = writer.next_header(FrameDestination::new(UnitId::new(0x01)), &mut tx_id);
        let body = MockBody {
            body: &[0x00, 0x0A, 0x00, 0x03],
        };
        let bytes = writer
            .format(header, FunctionCode::ReadCoils, &body, DecodeLevel::nothing())
            .unwrap();
        assert_eq!(bytes, &[0x01, 0x01, 0x00, 0x0A, 0x00, 0x03, 0x5C, 0x09]);
    }

    #[test]
    fn parses_rtu_response_from_a_single_chunk() {
        let mut reader = FramedReader::rtu();
        let frame = parse_frame(&mut reader, &[RTU_RESPONSE_FRAME]).unwrap();
        assert_eq!(
            frame.header.destination,
            FrameDestination::UnitId(UnitId::new(0x01))
        );
        assert_eq!(frame.header.tx_id, None);
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn parses_rtu_response_delivered_byte_by_byte() {
        // the response arrives split across four reads
        let mut reader = FramedReader::rtu();
        let frame = parse_frame(
            &mut reader,
            &[
                &RTU_RESPONSE_FRAME[0..1],
                &RTU_RESPONSE_FRAME[1..4],
                &RTU_RESPONSE_FRAME[4..5],
                &RTU_RESPONSE_FRAME[5..6],
            ],
        )
        .unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn parses_rtu_exception_response() {
        let mut reader = FramedReader::rtu();
        let frame = parse_frame(
            &mut reader,
            &[&[0x01, 0x81, 0x02, 0xC1, 0x91]],
        )
        .unwrap();
        assert_eq!(frame.payload(), &[0x81, 0x02]);
    }

    #[test]
    fn rejects_rtu_response_with_bad_crc() {
        let mut reader = FramedReader::rtu();
        let err = parse_frame(
            &mut reader,
            &[&[0x01, 0x01, 0x01, 0x05, 0x91, 0x00]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::CrcValidationFailure(0x0091, 0x8B91))
        );
    }

    #[test]
    fn rejects_rtu_response_with_unknown_function_code() {
        let mut reader = FramedReader::rtu();
        let err = parse_frame(&mut reader, &[&[0x01, 0x70]]).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::UnknownFunctionCode(0x70))
        );
    }

    #[test]
    fn formats_ascii_request_with_uppercase_hex_and_lrc() {
        let mut writer = FrameWriter::ascii();
        let mut tx_id = TxId::default();
        let header = writer.next_header(FrameDestination::new(UnitId::new(0x01)), &mut tx_id);
        let body = MockBody {
            body: &[0x00, 0x0A, 0x00, 0x03],
        };
        let bytes = writer
            .format(header, FunctionCode::ReadCoils, &body, DecodeLevel::nothing())
            .unwrap();
        assert_eq!(bytes, b":0101000A0003F1\r\n");
    }

    #[test]
    fn parses_ascii_response() {
        let mut reader = FramedReader::ascii();
        let frame = parse_frame(&mut reader, &[b":01010105F8\r\n"]).unwrap();
        assert_eq!(
            frame.header.destination,
            FrameDestination::UnitId(UnitId::new(0x01))
        );
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn parses_ascii_response_with_lowercase_hex_and_leading_noise() {
        let mut reader = FramedReader::ascii();
        let frame = parse_frame(
            &mut reader,
            &[b"\x00\xFF:01010105f8\r\n"],
        )
        .unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn parses_ascii_response_split_across_reads() {
        let mut reader = FramedReader::ascii();
        let frame = parse_frame(
            &mut reader,
            &[b":0101", b"0105F8", b"\r", b"\n"],
        )
        .unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn rejects_ascii_response_with_bad_lrc() {
        let mut reader = FramedReader::ascii();
        let err = parse_frame(&mut reader, &[b":01010105F7\r\n"]).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::LrcValidationFailure(0xF7, 0xF8))
        );
    }

    #[test]
    fn rejects_ascii_response_with_non_hex_character() {
        let mut reader = FramedReader::ascii();
        let err = parse_frame(&mut reader, &[b":01XY0105F8\r\n"]).unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::BadAsciiCharacter(b'X'))
        );
    }

    #[test]
    fn ascii_round_trip_preserves_the_adu() {
        // property 3 for the ASCII mode
        let mut writer = FrameWriter::ascii();
        let mut tx_id = TxId::default();
        let header = writer.next_header(FrameDestination::new(UnitId::new(0x2A)), &mut tx_id);
        let body = MockBody {
            body: &[0x01, 0x05],
        };
        let bytes = writer
            .format(header, FunctionCode::ReadCoils, &body, DecodeLevel::nothing())
            .unwrap()
            .to_vec();

        let mut reader = FramedReader::ascii();
        let frame = parse_frame(&mut reader, &[&bytes]).unwrap();
        assert_eq!(
            frame.header.destination,
            FrameDestination::UnitId(UnitId::new(0x2A))
        );
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x05]);
    }
}
