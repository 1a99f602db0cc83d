use crate::error::InternalError;

pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

pub(crate) fn byte_count_for_bits(count: usize) -> Result<u8, InternalError> {
    let bytes = (count + 7) / 8;
    u8::try_from(bytes).map_err(|_| InternalError::BadByteCount(bytes))
}

pub(crate) fn byte_count_for_registers(count: usize) -> Result<u8, InternalError> {
    let bytes = 2 * count;
    u8::try_from(bytes).map_err(|_| InternalError::BadByteCount(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_number_of_bytes_needed_for_count_of_packed_bits() {
        assert_eq!(num_bytes_for_bits(7), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(15), 2);
        assert_eq!(num_bytes_for_bits(16), 2);
        assert_eq!(num_bytes_for_bits(17), 3);
        assert_eq!(num_bytes_for_bits(0xFFFF), 8192); // ensure that it's free from overflow
    }

    #[test]
    fn byte_count_must_fit_in_u8() {
        assert_eq!(byte_count_for_bits(1968), Ok(246));
        assert_eq!(byte_count_for_registers(123), Ok(246));
        assert_eq!(
            byte_count_for_registers(128),
            Err(InternalError::BadByteCount(256))
        );
    }
}
