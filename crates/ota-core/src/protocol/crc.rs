//! CRC-16 used on every frame and sector.
//!
//! Polynomial 0x1021, initial value 0, MSB first, no reflection, no final XOR
//! (the XMODEM parameterisation of CRC-16/CCITT).

const POLY: u16 = 0x1021;

/// Compute the checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Check `data` against an expected checksum.
pub fn verify(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_self_consistent_trailer() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let crc = crc16(&data);
        assert!(verify(&data, crc));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let data: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        let original = crc16(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc16(&corrupted),
                    original,
                    "flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }
}
