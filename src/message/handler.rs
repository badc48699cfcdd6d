//! Serialization of record sets into event messages and back

use std::collections::BTreeSet;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_MAX_MESSAGE_SIZE,
    error::{EventRingError, Result},
};

use super::{
    checksum::ChecksumKind,
    compression::Compression,
    header::{EventHeader, EventMeta, WireReader, HEADER_LEN, MESSAGE_VERSION},
    record::{Record, RecordFlags, RecordSet},
};

/// Configuration of a message handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Upper bound for an encoded message, trailer included
    pub max_message_size: usize,
    /// Trailer algorithm used when serializing
    pub checksum: ChecksumKind,
    /// When set, only records with these names are serialized
    pub stream_only: Option<BTreeSet<String>>,
    /// Drop records flagged transient when serializing
    pub skip_transient: bool,
    /// Drop array records with an empty payload when serializing
    pub skip_empty_arrays: bool,
    /// Serialize records flagged persistent; cleared for per-event streams
    pub include_persistent: bool,
    /// Compression of the record section
    pub compression: Compression,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            checksum: ChecksumKind::default(),
            stream_only: None,
            skip_transient: false,
            skip_empty_arrays: false,
            include_persistent: true,
            compression: Compression::None,
        }
    }
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Restrict serialization to the named records
    pub fn stream_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_skip_transient(mut self, skip: bool) -> Self {
        self.skip_transient = skip;
        self
    }

    pub fn with_skip_empty_arrays(mut self, skip: bool) -> Self {
        self.skip_empty_arrays = skip;
        self
    }

    pub fn with_include_persistent(mut self, include: bool) -> Self {
        self.include_persistent = include;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let min = HEADER_LEN + self.checksum.trailer_len();
        if self.max_message_size < min {
            return Err(EventRingError::invalid_parameter(
                "max_message_size",
                format!("Must be at least {} bytes", min),
            ));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(EventRingError::invalid_parameter(
                "max_message_size",
                format!("Must not exceed {} bytes", u32::MAX),
            ));
        }
        Ok(())
    }

    fn selects(&self, record: &Record) -> bool {
        if self.skip_transient && record.flags.is_transient() {
            return false;
        }
        if self.skip_empty_arrays && record.flags.is_array() && record.payload.is_empty() {
            return false;
        }
        if !self.include_persistent && record.flags.is_persistent() {
            return false;
        }
        match &self.stream_only {
            Some(names) => names.contains(&record.name),
            None => true,
        }
    }
}

/// One encoded, immutable event message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    header: EventHeader,
    bytes: Vec<u8>,
}

impl EventMessage {
    /// Wrap received bytes, checking the header and the declared length.
    ///
    /// Records and trailer are checked by `MessageHandler::deserialize`.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = EventHeader::decode(&bytes)?;
        if header.total_len as usize != bytes.len() {
            return Err(EventRingError::decoding(format!(
                "Declared length {} does not match buffer length {}",
                header.total_len,
                bytes.len()
            )));
        }
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn is_terminate(&self) -> bool {
        self.header.is_terminate()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Header and records recovered from one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub header: EventHeader,
    pub records: RecordSet,
}

/// Builds event messages from record sets and parses them back
#[derive(Debug, Clone, Default)]
pub struct MessageHandler {
    config: HandlerConfig,
}

impl MessageHandler {
    pub fn new(config: HandlerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Encode the selected records of `records` into one message.
    ///
    /// Order is preserved. Fails with `Encoding` on duplicate names or when the
    /// message would exceed `max_message_size`.
    pub fn serialize(&self, meta: EventMeta, records: &RecordSet) -> Result<EventMessage> {
        let selected: Vec<&Record> = records.iter().filter(|r| self.config.selects(r)).collect();

        let mut seen = BTreeSet::new();
        for record in &selected {
            if !seen.insert(record.name.as_str()) {
                return Err(EventRingError::encoding(format!(
                    "Duplicate record name '{}'",
                    record.name
                )));
            }
        }

        let mut section = Vec::with_capacity(selected.iter().map(|r| r.encoded_len()).sum());
        for record in &selected {
            let name = record.name.as_bytes();
            if name.len() > u16::MAX as usize {
                return Err(EventRingError::encoding(format!(
                    "Record name of {} bytes is too long",
                    name.len()
                )));
            }
            section.extend_from_slice(&(name.len() as u16).to_le_bytes());
            section.extend_from_slice(&record.flags.bits().to_le_bytes());
            section.extend_from_slice(name);
            section.extend_from_slice(&record.type_tag.to_le_bytes());
            section.extend_from_slice(&(record.payload.len() as u32).to_le_bytes());
            section.extend_from_slice(&record.payload);
        }
        // the receiver refuses to expand beyond the same bound
        if HEADER_LEN + section.len() > self.config.max_message_size {
            return Err(EventRingError::encoding(format!(
                "Records of {} bytes exceed the maximum message size of {} bytes",
                section.len(),
                self.config.max_message_size
            )));
        }
        let compression = self.config.compression;
        let section = compression.compress(section);

        let checksum = self.config.checksum;
        let total = HEADER_LEN + section.len() + checksum.trailer_len();
        if total > self.config.max_message_size {
            return Err(EventRingError::encoding(format!(
                "Message of {} bytes exceeds the maximum of {} bytes",
                total, self.config.max_message_size
            )));
        }

        let narrays = selected.iter().filter(|r| r.flags.is_array()).count() as u32;
        let header = EventHeader {
            total_len: total as u32,
            version: MESSAGE_VERSION,
            msg_type: meta.msg_type,
            checksum,
            compression,
            record_count: selected.len() as u32,
            nobjects: selected.len() as u32 - narrays,
            narrays,
            id: meta.id,
            source_id: meta.source_id,
            sequence: meta.sequence,
        };

        let mut bytes = Vec::with_capacity(total);
        header.encode_into(&mut bytes);
        bytes.extend_from_slice(&section);
        if checksum != ChecksumKind::None {
            let sum = checksum.compute(&bytes);
            bytes.extend_from_slice(&sum.to_le_bytes());
        }
        debug_assert_eq!(bytes.len(), total);

        trace!(
            "serialized {} with {} records into {} bytes",
            meta.id,
            selected.len(),
            total
        );
        Ok(EventMessage { header, bytes })
    }

    /// End-of-stream marker
    pub fn terminate(&self, meta: EventMeta) -> Result<EventMessage> {
        self.serialize(meta.with_type(super::MessageType::Terminate), &RecordSet::new())
    }

    /// Parse a message, verifying length, version and trailer
    pub fn deserialize(&self, bytes: &[u8]) -> Result<DecodedEvent> {
        if bytes.len() > self.config.max_message_size {
            return Err(EventRingError::decoding(format!(
                "Message of {} bytes exceeds the maximum of {} bytes",
                bytes.len(),
                self.config.max_message_size
            )));
        }

        let header = EventHeader::decode(bytes)?;
        if header.total_len as usize != bytes.len() {
            return Err(EventRingError::decoding(format!(
                "Declared length {} does not match buffer length {}",
                header.total_len,
                bytes.len()
            )));
        }

        let trailer = header.checksum.trailer_len();
        if bytes.len() < HEADER_LEN + trailer {
            return Err(EventRingError::decoding("Message too short for its trailer"));
        }
        let body_end = bytes.len() - trailer;
        if trailer > 0 {
            let t = &bytes[body_end..];
            let expected = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);
            let actual = header.checksum.compute(&bytes[..body_end]);
            if expected != actual {
                return Err(EventRingError::integrity(expected, actual));
            }
        }

        let section = header
            .compression
            .decompress(&bytes[HEADER_LEN..body_end], self.config.max_message_size)?;
        let records = Self::decode_records(&header, &section)?;
        debug!(
            "deserialized {} ({} records, {} bytes)",
            header.id,
            records.len(),
            bytes.len()
        );
        Ok(DecodedEvent { header, records })
    }

    /// Parse a message previously wrapped with `EventMessage::from_bytes`
    pub fn decode(&self, message: &EventMessage) -> Result<DecodedEvent> {
        self.deserialize(message.as_bytes())
    }

    fn decode_records(header: &EventHeader, section: &[u8]) -> Result<RecordSet> {
        let mut reader = WireReader::new(section);

        let mut records = RecordSet::new();
        let mut narrays = 0u32;
        for index in 0..header.record_count {
            let name_len = reader.u16("record name length")? as usize;
            let flags = RecordFlags::from_bits(reader.u16("record flags")?);
            let name = reader.take(name_len, "record name")?;
            let name = std::str::from_utf8(name).map_err(|e| {
                EventRingError::decoding(format!("Record {} name is not UTF-8: {}", index, e))
            })?;
            let type_tag = reader.u32("record type tag")?;
            let payload_len = reader.u32("record payload length")? as usize;
            let payload = reader.take(payload_len, "record payload")?;

            if flags.is_array() {
                narrays += 1;
            }
            records
                .insert(Record::new(name, type_tag, payload).with_flags(flags))
                .map_err(|e| EventRingError::decoding(e.to_string()))?;
        }

        if reader.position() != section.len() {
            return Err(EventRingError::decoding(format!(
                "{} trailing bytes after {} records",
                section.len() - reader.position(),
                header.record_count
            )));
        }
        if narrays != header.narrays || header.record_count - narrays != header.nobjects {
            return Err(EventRingError::decoding(format!(
                "Object/array counts {}/{} do not match records",
                header.nobjects, header.narrays
            )));
        }
        Ok(records)
    }
}
