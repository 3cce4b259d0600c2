//! Table-driven CRC engine.
//!
//! Two algorithms are supported, both described by the usual
//! width/poly/init/refin/refout/xorout parameters:
//!
//! | name      | width | poly       | init       | reflected | xorout     | check("123456789") |
//! |-----------|-------|------------|------------|-----------|------------|--------------------|
//! | CRC-CCITT | 16    | 0x1021     | 0xFFFF     | no        | 0x0000     | 0x29B1             |
//! | CRC-32    | 32    | 0x04C11DB7 | 0xFFFFFFFF | yes       | 0xFFFFFFFF | 0xCBF43926         |
//!
//! ISHNE protects its header with CRC-CCITT; CRC-32 is what MUSE-XML uses for
//! lead data.

use std::fmt;
use std::str::FromStr;

use crate::error::{EcgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrcAlgorithm {
    Ccitt,
    Crc32,
}

impl CrcAlgorithm {
    fn params(self) -> CrcParams {
        match self {
            CrcAlgorithm::Ccitt => CrcParams {
                width: 16,
                poly: 0x1021,
                init: 0xFFFF,
                reflect: false,
                xor_out: 0,
            },
            CrcAlgorithm::Crc32 => CrcParams {
                width: 32,
                poly: 0x04C1_1DB7,
                init: 0xFFFF_FFFF,
                reflect: true,
                xor_out: 0xFFFF_FFFF,
            },
        }
    }
}

impl FromStr for CrcAlgorithm {
    type Err = EcgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CCITT" | "CRC-CCITT" | "CRC_CCITT" | "CRC16" | "CRC-16" => Ok(CrcAlgorithm::Ccitt),
            "CRC32" | "CRC-32" | "CRC_32" => Ok(CrcAlgorithm::Crc32),
            _ => Err(EcgError::UnknownCrcAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for CrcAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcAlgorithm::Ccitt => write!(f, "CRC-CCITT"),
            CrcAlgorithm::Crc32 => write!(f, "CRC-32"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CrcParams {
    width: u32,
    poly: u32,
    init: u32,
    /// refin 和 refout 总是相同
    reflect: bool,
    xor_out: u32,
}

/// CRC calculator with a precomputed 256-entry table.
#[derive(Clone)]
pub struct Crc {
    algorithm: CrcAlgorithm,
    params: CrcParams,
    table: [u32; 256],
}

impl fmt::Debug for Crc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc").field("algorithm", &self.algorithm).finish()
    }
}

impl Crc {
    pub fn new(algorithm: CrcAlgorithm) -> Self {
        let params = algorithm.params();
        Crc { algorithm, params, table: build_table(&params) }
    }

    /// Selects the algorithm by name, e.g. `"CCITT"` or `"CRC32"`.
    pub fn by_name(name: &str) -> Result<Self> {
        Ok(Crc::new(name.parse()?))
    }

    pub fn algorithm(&self) -> CrcAlgorithm {
        self.algorithm
    }

    /// Runs the algorithm over exactly `buffer[offset..offset + length]`.
    ///
    /// The range is clipped to the buffer.
    pub fn calc(&self, buffer: &[u8], offset: usize, length: usize) -> u32 {
        let start = offset.min(buffer.len());
        let end = offset.saturating_add(length).min(buffer.len());
        self.checksum(&buffer[start..end])
    }

    pub fn checksum(&self, data: &[u8]) -> u32 {
        let p = &self.params;
        let mask = width_mask(p.width);

        let mut crc = if p.reflect { reflect(p.init, p.width) } else { p.init };
        if p.reflect {
            for &b in data {
                crc = (crc >> 8) ^ self.table[((crc ^ b as u32) & 0xFF) as usize];
            }
        } else {
            let shift = p.width - 8;
            for &b in data {
                crc = (crc << 8) ^ self.table[(((crc >> shift) ^ b as u32) & 0xFF) as usize];
                crc &= mask;
            }
        }
        (crc ^ p.xor_out) & mask
    }
}

fn width_mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

fn reflect(value: u32, bits: u32) -> u32 {
    value.reverse_bits() >> (32 - bits)
}

fn build_table(p: &CrcParams) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mask = width_mask(p.width);

    if p.reflect {
        let poly = reflect(p.poly, p.width);
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            }
            *entry = crc & mask;
        }
    } else {
        let top = 1u32 << (p.width - 1);
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << (p.width - 8);
            for _ in 0..8 {
                crc = if crc & top != 0 { (crc << 1) ^ p.poly } else { crc << 1 };
            }
            *entry = crc & mask;
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_check_values() {
        assert_eq!(Crc::new(CrcAlgorithm::Ccitt).checksum(CHECK), 0x29B1);
        assert_eq!(Crc::new(CrcAlgorithm::Crc32).checksum(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn test_calc_uses_exact_range() {
        let crc = Crc::new(CrcAlgorithm::Ccitt);
        let mut buffer = b"xx123456789yy".to_vec();
        assert_eq!(crc.calc(&buffer, 2, 9), 0x29B1);
        buffer[0] = b'z';
        buffer[12] = b'z';
        assert_eq!(crc.calc(&buffer, 2, 9), 0x29B1);
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let data: Vec<u8> = (0..64u8).collect();
        for algorithm in [CrcAlgorithm::Ccitt, CrcAlgorithm::Crc32] {
            let crc = Crc::new(algorithm);
            let reference = crc.checksum(&data);
            for byte in 0..data.len() {
                for bit in 0..8 {
                    let mut flipped = data.clone();
                    flipped[byte] ^= 1 << bit;
                    assert_ne!(crc.checksum(&flipped), reference, "{} byte {} bit {}", algorithm, byte, bit);
                }
            }
        }
    }

    #[test]
    fn test_by_name() {
        assert_eq!(Crc::by_name("ccitt").unwrap().algorithm(), CrcAlgorithm::Ccitt);
        assert_eq!(Crc::by_name("CRC-32").unwrap().algorithm(), CrcAlgorithm::Crc32);
        assert!(matches!(Crc::by_name("adler"), Err(EcgError::UnknownCrcAlgorithm(_))));
    }

    #[test]
    fn test_empty_range() {
        let crc = Crc::new(CrcAlgorithm::Ccitt);
        assert_eq!(crc.calc(&[], 0, 10), 0xFFFF);
    }
}
