use crate::client::requests::read_write_registers::ReadWriteRegisters;
use crate::client::requests::write_multiple::WriteMultiple;
use crate::common::bits::{byte_count_for_bits, byte_count_for_registers};
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::traits::{Parse, Serialize};
use crate::error::RequestError;
use crate::types::{coil_from_u16, coil_to_u16, AddressRange, Indexed};

impl Serialize for AddressRange {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.start)?;
        cursor.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Parse for AddressRange {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(AddressRange::try_from(
            cursor.read_u16_be()?,
            cursor.read_u16_be()?,
        )?)
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(coil_to_u16(self.value))?;
        Ok(())
    }
}

impl Parse for Indexed<bool> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(
            cursor.read_u16_be()?,
            coil_from_u16(cursor.read_u16_be()?)?,
        ))
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Parse for Indexed<u16> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
    }
}

impl Serialize for WriteMultiple<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;

        cursor.write_u8(byte_count_for_bits(self.values.len())?)?;

        // bits are packed low-address-first, LSB-first within each byte,
        // unused high bits left at zero
        for chunk in self.values.chunks(8) {
            let mut acc: u8 = 0;
            for (count, bit) in chunk.iter().enumerate() {
                if *bit {
                    acc |= 1 << count as u8;
                }
            }
            cursor.write_u8(acc)?;
        }

        Ok(())
    }
}

impl Serialize for WriteMultiple<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;

        cursor.write_u8(byte_count_for_registers(self.values.len())?)?;

        for value in &self.values {
            cursor.write_u16_be(*value)?;
        }

        Ok(())
    }
}

impl Serialize for ReadWriteRegisters {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.read_range.serialize(cursor)?;
        self.write_range.serialize(cursor)?;

        cursor.write_u8(byte_count_for_registers(self.values.len())?)?;

        for value in &self.values {
            cursor.write_u16_be(*value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(msg: &dyn Serialize) -> Vec<u8> {
        let mut buffer = [0u8; 64];
        let mut cursor = WriteCursor::new(&mut buffer);
        msg.serialize(&mut cursor).unwrap();
        cursor.written().to_vec()
    }

    #[test]
    fn serializes_address_range() {
        let range = AddressRange::try_from(3, 512).unwrap();
        assert_eq!(serialize(&range), &[0x00, 0x03, 0x02, 0x00]);
    }

    #[test]
    fn serializes_single_coil_with_specified_on_value() {
        assert_eq!(
            serialize(&Indexed::new(0x0102, true)),
            &[0x01, 0x02, 0xFF, 0x00]
        );
        assert_eq!(
            serialize(&Indexed::new(0x0102, false)),
            &[0x01, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn parse_rejects_unknown_coil_state() {
        let mut cursor = ReadCursor::new(&[0x00, 0x01, 0xAB, 0xCD]);
        assert_eq!(
            Indexed::<bool>::parse(&mut cursor),
            Err(crate::error::AduParseError::UnknownCoilState(0xABCD).into())
        );
    }

    #[test]
    fn packs_multiple_coils_lsb_first() {
        let request =
            WriteMultiple::from(10, vec![true, false, true, false, false, false, false, false, true])
                .unwrap();
        assert_eq!(
            serialize(&request),
            // start, qty, byte count, packed bits
            &[0x00, 0x0A, 0x00, 0x09, 0x02, 0x05, 0x01]
        );
    }

    #[test]
    fn serializes_multiple_registers_big_endian() {
        let request = WriteMultiple::from(1, vec![0xCAFE, 0x0001]).unwrap();
        assert_eq!(
            serialize(&request),
            &[0x00, 0x01, 0x00, 0x02, 0x04, 0xCA, 0xFE, 0x00, 0x01]
        );
    }

    #[test]
    fn serializes_read_write_multiple_registers_request() {
        let request = ReadWriteRegisters::new(
            AddressRange::try_from(0x10, 2).unwrap(),
            0x0100,
            vec![0xAABB, 0xCCDD],
        )
        .unwrap();
        assert_eq!(
            serialize(&request),
            &[
                0x00, 0x10, 0x00, 0x02, // read range
                0x01, 0x00, 0x00, 0x02, // write range
                0x04, // write byte count
                0xAA, 0xBB, 0xCC, 0xDD // values
            ]
        );
    }
}
