//! The three checksums spoken on the wire and on disk.

use crc::{Crc, CRC_8_AUTOSAR, CRC_8_SAE_J1850};

/// CRC-8/J1850 used by the operational frames: polynomial 0x1D,
/// init 0xFF, xor-out 0xFF, not reflected. Table-driven.
const J1850: Crc<u8> = Crc::<u8>::new(&CRC_8_SAE_J1850);

/// CRC-8 used by the parameter block: polynomial 0x2F, init 0xFF,
/// final bit-flip. Table-driven.
const PARAM: Crc<u8> = Crc::<u8>::new(&CRC_8_AUTOSAR);

pub fn crc8_j1850(data: &[u8]) -> u8 {
    J1850.checksum(data)
}

pub fn crc8_param(data: &[u8]) -> u8 {
    PARAM.checksum(data)
}

/// Two's-complement sum byte of the bootloader protocol: the sum of all
/// covered bytes plus the checksum byte is zero modulo 256.
pub fn boot_sum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

pub fn boot_sum_valid(data: &[u8], sum: u8) -> bool {
    boot_sum(data) == sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn j1850_check_value() {
        // published check value of CRC-8/SAE-J1850
        assert_eq!(crc8_j1850(b"123456789"), 0x4b);
    }

    #[test]
    fn param_check_value() {
        // published check value of CRC-8/AUTOSAR
        assert_eq!(crc8_param(b"123456789"), 0xdf);
    }

    #[test]
    fn j1850_matches_bitwise_reference() {
        fn bitwise(data: &[u8]) -> u8 {
            let mut crc = 0xffu8;
            for &b in data {
                crc ^= b;
                for _ in 0..8 {
                    crc = if crc & 0x80 != 0 {
                        (crc << 1) ^ 0x1d
                    } else {
                        crc << 1
                    };
                }
            }
            crc ^ 0xff
        }

        for sample in [&b"\x00"[..], b"\xa5\x06", b"123456789", b"\xff\xff\xff"] {
            assert_eq!(crc8_j1850(sample), bitwise(sample));
        }
    }

    #[test]
    fn param_matches_bitwise_reference() {
        fn bitwise(data: &[u8]) -> u8 {
            let mut crc = 0xffu8;
            for &b in data {
                crc ^= b;
                for _ in 0..8 {
                    crc = if crc & 0x80 != 0 {
                        (crc << 1) ^ 0x2f
                    } else {
                        crc << 1
                    };
                }
            }
            crc ^ 0xff
        }

        for sample in [&b"\x00"[..], b"\x0d\xf0\x01\xc0", b"123456789"] {
            assert_eq!(crc8_param(sample), bitwise(sample));
        }
    }

    #[test]
    fn boot_sum_law() {
        // for any payload, SUM plus the byte sum is zero modulo 256
        for payload in [&b"\x00\x01\x00"[..], b"\x00\x02\x00\x00", b"\xff\xfe\x80"] {
            let sum = boot_sum(payload);
            let total = payload
                .iter()
                .fold(sum, |acc, b| acc.wrapping_add(*b));
            assert_eq!(total, 0);
            assert!(boot_sum_valid(payload, sum));
            assert!(!boot_sum_valid(payload, sum.wrapping_add(1)));
        }
    }

    #[test]
    fn boot_sum_known_vectors() {
        // inquiry command body and its documented checksum
        assert_eq!(boot_sum(&[0x00, 0x01, 0x00]), 0xff);
        // status response body for a successful inquiry
        assert_eq!(boot_sum(&[0x00, 0x02, 0x00, 0x00]), 0xfe);
    }
}
