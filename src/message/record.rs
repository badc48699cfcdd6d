//! Named, typed records carried by an event message

use serde::{Deserialize, Serialize};

use crate::error::{EventRingError, Result};

/// Longest record name the wire format can carry
pub const MAX_RECORD_NAME_LEN: usize = u16::MAX as usize;

/// Marker bits describing how a record was stored on the producer side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFlags(u16);

impl RecordFlags {
    /// Single object
    pub const NONE: RecordFlags = RecordFlags(0);
    /// The record holds an array of objects rather than one object
    pub const ARRAY: RecordFlags = RecordFlags(1 << 0);
    /// Durable: kept when the event is written out
    pub const PERSISTENT: RecordFlags = RecordFlags(1 << 1);
    /// Only meaningful inside one process; may be skipped when streaming
    pub const TRANSIENT: RecordFlags = RecordFlags(1 << 2);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_array(self) -> bool {
        self.contains(Self::ARRAY)
    }

    pub fn is_persistent(self) -> bool {
        self.contains(RecordFlags::PERSISTENT)
    }

    pub fn is_transient(self) -> bool {
        self.contains(Self::TRANSIENT)
    }
}

impl std::ops::BitOr for RecordFlags {
    type Output = RecordFlags;

    fn bitor(self, rhs: RecordFlags) -> RecordFlags {
        RecordFlags(self.0 | rhs.0)
    }
}

/// One named, typed, opaque payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub type_tag: u32,
    pub flags: RecordFlags,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(name: impl Into<String>, type_tag: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            type_tag,
            flags: RecordFlags::NONE,
            payload: payload.into(),
        }
    }

    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Bytes this record occupies in an encoded message
    pub fn encoded_len(&self) -> usize {
        // name_len u16, flags u16, name, type_tag u32, payload_len u32, payload
        2 + 2 + self.name.len() + 4 + 4 + self.payload.len()
    }
}

/// Ordered collection of records with unique names.
///
/// Insertion order is preserved so replay is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; fails if the name is already present
    pub fn insert(&mut self, record: Record) -> Result<()> {
        if record.name.is_empty() {
            return Err(EventRingError::encoding("Record name cannot be empty"));
        }
        if record.name.len() > MAX_RECORD_NAME_LEN {
            return Err(EventRingError::encoding(format!(
                "Record name of {} bytes exceeds {} bytes",
                record.name.len(),
                MAX_RECORD_NAME_LEN
            )));
        }
        if self.contains(&record.name) {
            return Err(EventRingError::encoding(format!(
                "Duplicate record name '{}'",
                record.name
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Builder-style `insert`
    pub fn with(mut self, record: Record) -> Result<Self> {
        self.insert(record)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    /// Total payload bytes
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(|r| r.payload.len()).sum()
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let mut set = RecordSet::new();
        set.insert(Record::new("hits", 1, vec![1, 2])).unwrap();
        let err = set.insert(Record::new("hits", 2, vec![])).unwrap_err();
        assert!(matches!(err, EventRingError::Encoding { .. }));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_order_preserved() {
        let set = RecordSet::new()
            .with(Record::new("b", 1, vec![]))
            .and_then(|s| s.with(Record::new("a", 1, vec![])))
            .and_then(|s| s.with(Record::new("c", 1, vec![])))
            .unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_flags() {
        let flags = RecordFlags::ARRAY | RecordFlags::TRANSIENT;
        assert!(flags.is_array());
        assert!(flags.is_transient());
        assert!(!flags.contains(RecordFlags::PERSISTENT));
        assert_eq!(RecordFlags::from_bits(flags.bits()), flags);
    }
}
