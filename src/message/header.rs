//! Event message header definitions and constants

use serde::{Deserialize, Serialize};

use crate::error::{EventRingError, Result};

use super::{checksum::ChecksumKind, compression::Compression};

/// Magic number for message header validation ("EVMS")
pub const MESSAGE_MAGIC: u32 = 0x4556_4D53;

/// Current message format version
pub const MESSAGE_VERSION: u16 = 1;

/// Encoded size of the header in bytes
pub const HEADER_LEN: usize = 56;

/// Kind of an event message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// One event's records
    Event = 1,
    /// End-of-stream marker; carries no records
    Terminate = 2,
    /// Start of a run
    BeginRun = 3,
    /// End of a run
    EndRun = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = EventRingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::Event),
            2 => Ok(MessageType::Terminate),
            3 => Ok(MessageType::BeginRun),
            4 => Ok(MessageType::EndRun),
            other => Err(EventRingError::decoding(format!(
                "Unknown message type {}",
                other
            ))),
        }
    }
}

/// Experiment/run/event numbers identifying one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub experiment: u32,
    pub run: u32,
    pub event: u64,
}

impl EventId {
    pub fn new(experiment: u32, run: u32, event: u64) -> Self {
        Self {
            experiment,
            run,
            event,
        }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exp {} run {} evt {}", self.experiment, self.run, self.event)
    }
}

/// Envelope fields chosen by the producer of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub msg_type: MessageType,
    pub id: EventId,
    /// Identifies the producing process
    pub source_id: u32,
    /// Per-producer sequence number, restores cross-producer order downstream
    pub sequence: u64,
}

impl EventMeta {
    /// Metadata of a regular event
    pub fn event(id: EventId) -> Self {
        Self {
            msg_type: MessageType::Event,
            id,
            source_id: 0,
            sequence: 0,
        }
    }

    /// Metadata of an end-of-stream marker
    pub fn terminate() -> Self {
        Self {
            msg_type: MessageType::Terminate,
            ..Self::event(EventId::default())
        }
    }

    pub fn with_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = msg_type;
        self
    }

    pub fn with_source(mut self, source_id: u32, sequence: u64) -> Self {
        self.source_id = source_id;
        self.sequence = sequence;
        self
    }
}

/// Decoded fixed-size header at the start of every event message.
///
/// Layout (little-endian, 56 bytes):
/// - total_len: u32 (whole message, trailer included)
/// - magic: u32, version: u16, msg_type: u8, checksum kind: u8
/// - record_count, nobjects, narrays: u32 each
/// - experiment: u32, run: u32, event: u64
/// - source_id: u32, compression: u8, reserved: 3 bytes, sequence: u64
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub total_len: u32,
    pub version: u16,
    pub msg_type: MessageType,
    pub checksum: ChecksumKind,
    /// Applied to the record section only
    pub compression: Compression,
    pub record_count: u32,
    /// Records that are single objects
    pub nobjects: u32,
    /// Records flagged as arrays
    pub narrays: u32,
    pub id: EventId,
    pub source_id: u32,
    pub sequence: u64,
}

impl EventHeader {
    /// Metadata the header was built from
    pub fn meta(&self) -> EventMeta {
        EventMeta {
            msg_type: self.msg_type,
            id: self.id,
            source_id: self.source_id,
            sequence: self.sequence,
        }
    }

    /// Whether this is an end-of-stream marker
    pub fn is_terminate(&self) -> bool {
        self.msg_type == MessageType::Terminate
    }

    pub(super) fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_len.to_le_bytes());
        out.extend_from_slice(&MESSAGE_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.msg_type as u8);
        out.push(self.checksum as u8);
        out.extend_from_slice(&self.record_count.to_le_bytes());
        out.extend_from_slice(&self.nobjects.to_le_bytes());
        out.extend_from_slice(&self.narrays.to_le_bytes());
        out.extend_from_slice(&self.id.experiment.to_le_bytes());
        out.extend_from_slice(&self.id.run.to_le_bytes());
        out.extend_from_slice(&self.id.event.to_le_bytes());
        out.extend_from_slice(&self.source_id.to_le_bytes());
        out.push(self.compression as u8);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }

    /// Decode and validate the header at the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let total_len = reader.u32("total length")?;

        let magic = reader.u32("magic")?;
        if magic != MESSAGE_MAGIC {
            return Err(EventRingError::decoding(format!(
                "Invalid message magic: expected {:#010x}, got {:#010x}",
                MESSAGE_MAGIC, magic
            )));
        }

        let version = reader.u16("version")?;
        if version != MESSAGE_VERSION {
            return Err(EventRingError::decoding(format!(
                "Unsupported message format version {}",
                version
            )));
        }

        let msg_type = MessageType::try_from(reader.u8("message type")?)?;
        let checksum = ChecksumKind::try_from(reader.u8("checksum kind")?)?;
        let record_count = reader.u32("record count")?;
        let nobjects = reader.u32("object count")?;
        let narrays = reader.u32("array count")?;
        let id = EventId {
            experiment: reader.u32("experiment")?,
            run: reader.u32("run")?,
            event: reader.u64("event")?,
        };
        let source_id = reader.u32("source id")?;
        let compression = Compression::try_from(reader.u8("compression")?)?;
        reader.take(3, "reserved")?;
        let sequence = reader.u64("sequence")?;

        Ok(Self {
            total_len,
            version,
            msg_type,
            checksum,
            compression,
            record_count,
            nobjects,
            narrays,
            id,
            source_id,
            sequence,
        })
    }
}

/// Bounds-checked little-endian reader over a message buffer
pub(super) struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(super) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(super) fn position(&self) -> usize {
        self.pos
    }

    pub(super) fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                EventRingError::decoding(format!(
                    "Truncated {} at byte {} ({} bytes needed, {} left)",
                    what,
                    self.pos,
                    len,
                    self.bytes.len() - self.pos
                ))
            })?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(super) fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(super) fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(super) fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(super) fn u64(&mut self, what: &str) -> Result<u64> {
        let b = self.take(8, what)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventHeader {
        EventHeader {
            total_len: HEADER_LEN as u32,
            version: MESSAGE_VERSION,
            msg_type: MessageType::BeginRun,
            checksum: ChecksumKind::Xor32,
            compression: Compression::Lz4,
            record_count: 0,
            nobjects: 0,
            narrays: 0,
            id: EventId::new(7, 12, 1 << 40),
            source_id: 3,
            sequence: 99,
        }
    }

    #[test]
    fn test_encoded_length() {
        let mut out = Vec::new();
        sample().encode_into(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(EventHeader::decode(&out).unwrap(), sample());
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut out = Vec::new();
        sample().encode_into(&mut out);

        let mut bad = out.clone();
        bad[4] ^= 0xff;
        assert!(matches!(
            EventHeader::decode(&bad),
            Err(EventRingError::Decoding { .. })
        ));

        let mut bad = out;
        bad[8] = 9;
        let err = EventHeader::decode(&bad).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_short_header() {
        let err = EventHeader::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, EventRingError::Decoding { .. }));
    }
}
