//! Optional compression of the record section of a message

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{EventRingError, Result};

/// Bytes of the uncompressed-length prefix written by `lz4_flex`
const SIZE_PREFIX_LEN: usize = 4;

/// Compression applied to the records of an event message.
///
/// The header and the checksum trailer stay uncompressed, so integrity is
/// verified on the bytes as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    /// LZ4 block format with the uncompressed size prepended
    Lz4 = 1,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
        }
    }

    pub(super) fn compress(self, records: Vec<u8>) -> Vec<u8> {
        match self {
            Compression::None => records,
            Compression::Lz4 => lz4_flex::compress_prepend_size(&records),
        }
    }

    /// Restore the record section; `limit` bounds the uncompressed size
    pub(super) fn decompress<'a>(self, body: &'a [u8], limit: usize) -> Result<Cow<'a, [u8]>> {
        match self {
            Compression::None => Ok(Cow::Borrowed(body)),
            Compression::Lz4 => {
                if body.len() < SIZE_PREFIX_LEN {
                    return Err(EventRingError::decoding(
                        "Compressed records are missing their size prefix",
                    ));
                }
                let size = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
                if size > limit {
                    return Err(EventRingError::decoding(format!(
                        "Compressed records expand to {} bytes, above the limit of {}",
                        size, limit
                    )));
                }
                let records = lz4_flex::decompress_size_prepended(body).map_err(|e| {
                    EventRingError::decoding(format!("LZ4 decompression failed: {}", e))
                })?;
                Ok(Cow::Owned(records))
            }
        }
    }
}

impl TryFrom<u8> for Compression {
    type Error = EventRingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            other => Err(EventRingError::decoding(format!(
                "Unknown compression {}",
                other
            ))),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = EventRingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            _ => Err(EventRingError::invalid_parameter(
                "compression",
                format!("Unknown compression '{}'", s),
            )),
        }
    }
}
