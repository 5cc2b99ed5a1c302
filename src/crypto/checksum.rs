//! POSIX `cksum` checksum.
//!
//! CRC-32/CKSUM over the data, then over the data length (least significant
//! byte first, only as many bytes as the length needs), then inverted.

use crc::{Crc, CRC_32_CKSUM};

const CKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_CKSUM);

pub fn cksum(data: &[u8]) -> u32 {
    let mut digest = CKSUM.digest();
    digest.update(data);

    let mut len = data.len();
    while len > 0 {
        digest.update(&[(len & 0xFF) as u8]);
        len >>= 8;
    }

    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(cksum(b"hello there"), 3141126258);
        assert_eq!(cksum(&[b'a'; 500]), 134456518);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(cksum(b""), 0xFFFF_FFFF);
    }

    #[test]
    fn test_length_is_mixed_in() {
        let data: Vec<u8> = (0u8..100).collect();
        assert_eq!(cksum(&data), 3013549837);
        assert_ne!(cksum(&[0u8; 1]), cksum(&[0u8; 2]));
    }
}
