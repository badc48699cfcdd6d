//! Integrity trailer algorithms

use serde::{Deserialize, Serialize};

use crate::error::{EventRingError, Result};

/// Algorithm used for the optional trailer of an event message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ChecksumKind {
    /// No trailer
    None = 0,
    /// XOR of the body taken as little-endian 32-bit words
    Xor32 = 1,
    /// CRC-32 (IEEE) of the body
    #[default]
    Crc32 = 2,
}

impl ChecksumKind {
    /// Bytes appended after the body
    pub fn trailer_len(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor32 | ChecksumKind::Crc32 => 4,
        }
    }

    /// Compute the checksum of `body`
    pub fn compute(self, body: &[u8]) -> u32 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor32 => xor32(body),
            ChecksumKind::Crc32 => crc32fast::hash(body),
        }
    }

    /// Name used in logs and the CLI
    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::None => "none",
            ChecksumKind::Xor32 => "xor32",
            ChecksumKind::Crc32 => "crc32",
        }
    }
}

impl TryFrom<u8> for ChecksumKind {
    type Error = EventRingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChecksumKind::None),
            1 => Ok(ChecksumKind::Xor32),
            2 => Ok(ChecksumKind::Crc32),
            other => Err(EventRingError::decoding(format!(
                "Unknown checksum kind {}",
                other
            ))),
        }
    }
}

impl std::str::FromStr for ChecksumKind {
    type Err = EventRingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ChecksumKind::None),
            "xor32" | "xor" => Ok(ChecksumKind::Xor32),
            "crc32" | "crc" => Ok(ChecksumKind::Crc32),
            _ => Err(EventRingError::invalid_parameter(
                "checksum",
                format!("Unknown checksum kind '{}'", s),
            )),
        }
    }
}

/// XOR of little-endian words; a trailing partial word is zero-padded
fn xor32(body: &[u8]) -> u32 {
    let mut chunks = body.chunks_exact(4);
    let mut acc = chunks
        .by_ref()
        .fold(0u32, |acc, w| acc ^ u32::from_le_bytes([w[0], w[1], w[2], w[3]]));

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut last = [0u8; 4];
        last[..rest.len()].copy_from_slice(rest);
        acc ^= u32::from_le_bytes(last);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor32() {
        assert_eq!(ChecksumKind::Xor32.compute(&[]), 0);
        assert_eq!(
            ChecksumKind::Xor32.compute(&[1, 0, 0, 0, 3, 0, 0, 0]),
            1 ^ 3
        );
        // partial word is padded with zeros
        assert_eq!(ChecksumKind::Xor32.compute(&[0xff, 0xff]), 0xffff);
    }

    #[test]
    fn test_crc32_matches_crc32fast() {
        let body = b"event body";
        assert_eq!(ChecksumKind::Crc32.compute(body), crc32fast::hash(body));
    }

    #[test]
    fn test_parse_and_tag() {
        assert_eq!("CRC32".parse::<ChecksumKind>().unwrap(), ChecksumKind::Crc32);
        assert!("md5".parse::<ChecksumKind>().is_err());
        assert_eq!(ChecksumKind::try_from(1).unwrap(), ChecksumKind::Xor32);
        assert!(ChecksumKind::try_from(9).is_err());
    }
}
