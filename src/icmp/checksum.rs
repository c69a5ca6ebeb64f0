/// One's-complement sum of big-endian 16-bit words, folded to 16 bits.
/// An odd trailing byte is padded with zero on the right.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// RFC 1071 Internet checksum. A computed value of zero is returned as
/// 0xFFFF, the other representation of zero in one's complement.
pub fn internet_checksum(data: &[u8]) -> u16 {
    match !ones_complement_sum(data) {
        0 => 0xFFFF,
        csum => csum,
    }
}

/// True when `data`, checksum field included, sums to all-ones
pub fn verify(data: &[u8]) -> bool {
    internet_checksum(data) == 0xFFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // RFC 1071 section 3 sample data
        let data = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(ones_complement_sum(&data), 0xDDF2);
        assert_eq!(internet_checksum(&data), 0x220D);
    }

    #[test]
    fn test_odd_length_pads_right() {
        assert_eq!(ones_complement_sum(&[0xAB]), 0xAB00);
        assert_eq!(ones_complement_sum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn test_zero_checksum_reported_as_ffff() {
        assert_eq!(internet_checksum(&[0xFF, 0xFF]), 0xFFFF);
    }

    #[test]
    fn test_verify_after_filling_checksum() {
        let mut data = vec![0x20, 0x00, 0x00, 0x00, 0x00, 0x08, 0x01, 0x01, 0x00, 0x06, 0x41, 0x01];
        assert!(!verify(&data));
        let csum = internet_checksum(&data);
        data[2..4].copy_from_slice(&csum.to_be_bytes());
        assert!(verify(&data));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn proptest_filled_checksum_verifies(mut data in prop::collection::vec(any::<u8>(), 4..128)) {
            data[2] = 0;
            data[3] = 0;
            let csum = internet_checksum(&data);
            data[2..4].copy_from_slice(&csum.to_be_bytes());
            prop_assert!(verify(&data));
        }
    }
}
