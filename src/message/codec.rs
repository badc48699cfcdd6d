//! Collaborator interface for turning domain objects into record payloads
//!
//! The message layer never interprets payloads. Producers register which type
//! tag each record name carries and supply a codec per type.

use std::{collections::HashMap, marker::PhantomData};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{EventRingError, Result};

use super::record::{Record, RecordFlags};

/// Encodes one kind of object to bytes and back
pub trait RecordCodec: Send + Sync {
    /// Object type handled by this codec
    type Object;

    /// Type tag written next to payloads produced by this codec
    fn type_tag(&self) -> u32;

    /// Encode an object into a payload
    fn encode_record(&self, object: &Self::Object) -> Result<Vec<u8>>;

    /// Decode a payload that was tagged with `type_tag`
    fn decode_record(&self, bytes: &[u8], type_tag: u32) -> Result<Self::Object>;
}

/// Codec for any serde type, using bincode
#[derive(Debug)]
pub struct SerdeCodec<T> {
    type_tag: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    pub fn new(type_tag: u32) -> Self {
        Self {
            type_tag,
            _marker: PhantomData,
        }
    }
}

impl<T> RecordCodec for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    type Object = T;

    fn type_tag(&self) -> u32 {
        self.type_tag
    }

    fn encode_record(&self, object: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(object)?)
    }

    fn decode_record(&self, bytes: &[u8], type_tag: u32) -> Result<T> {
        if type_tag != self.type_tag {
            return Err(EventRingError::decoding(format!(
                "Codec for tag {} cannot decode tag {}",
                self.type_tag, type_tag
            )));
        }
        bincode::deserialize(bytes)
            .map_err(|e| EventRingError::decoding(format!("Bincode error: {}", e)))
    }
}

/// Maps record names to the type tags they must carry
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    tags: HashMap<String, u32>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record name; re-registering with another tag is an error
    pub fn register(&mut self, name: impl Into<String>, type_tag: u32) -> Result<()> {
        let name = name.into();
        match self.tags.get(&name) {
            Some(existing) if *existing != type_tag => Err(EventRingError::invalid_parameter(
                "type_tag",
                format!(
                    "Record '{}' is already registered with tag {}",
                    name, existing
                ),
            )),
            _ => {
                self.tags.insert(name, type_tag);
                Ok(())
            }
        }
    }

    pub fn tag_of(&self, name: &str) -> Option<u32> {
        self.tags.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Encode `object` as the record `name`
    pub fn encode<C: RecordCodec>(
        &self,
        codec: &C,
        name: &str,
        object: &C::Object,
        flags: RecordFlags,
    ) -> Result<Record> {
        let tag = self.expect_tag(name, codec.type_tag())?;
        let payload = codec.encode_record(object)?;
        Ok(Record::new(name, tag, payload).with_flags(flags))
    }

    /// Decode `record` with `codec`, checking its tag against the registry
    pub fn decode<C: RecordCodec>(&self, codec: &C, record: &Record) -> Result<C::Object> {
        match self.tag_of(&record.name) {
            Some(tag) if tag == record.type_tag => {}
            Some(tag) => {
                return Err(EventRingError::decoding(format!(
                    "Record '{}' carries tag {} but {} is registered",
                    record.name, record.type_tag, tag
                )))
            }
            None => {
                return Err(EventRingError::decoding(format!(
                    "Record '{}' is not registered",
                    record.name
                )))
            }
        }
        codec.decode_record(&record.payload, record.type_tag)
    }

    fn expect_tag(&self, name: &str, codec_tag: u32) -> Result<u32> {
        match self.tag_of(name) {
            Some(tag) if tag == codec_tag => Ok(tag),
            Some(tag) => Err(EventRingError::encoding(format!(
                "Record '{}' is registered with tag {}, codec produces {}",
                name, tag, codec_tag
            ))),
            None => Err(EventRingError::encoding(format!(
                "Record '{}' is not registered",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Track {
        charge: i8,
        momentum: [f32; 3],
    }

    #[test]
    fn test_serde_codec_through_registry() {
        let mut registry = TypeRegistry::new();
        registry.register("tracks", 10).unwrap();
        let codec = SerdeCodec::<Vec<Track>>::new(10);

        let tracks = vec![Track {
            charge: -1,
            momentum: [0.1, 0.2, 1.5],
        }];
        let record = registry
            .encode(&codec, "tracks", &tracks, RecordFlags::ARRAY)
            .unwrap();
        assert_eq!(record.type_tag, 10);
        assert!(record.flags.is_array());

        assert_eq!(registry.decode(&codec, &record).unwrap(), tracks);
    }

    #[test]
    fn test_tag_mismatch() {
        let mut registry = TypeRegistry::new();
        registry.register("hits", 1).unwrap();
        assert!(registry.register("hits", 2).is_err());
        registry.register("hits", 1).unwrap();

        let codec = SerdeCodec::<u32>::new(2);
        assert!(registry.encode(&codec, "hits", &5, RecordFlags::NONE).is_err());
        assert!(registry.encode(&codec, "missing", &5, RecordFlags::NONE).is_err());
        assert!(codec.decode_record(&[0; 4], 3).is_err());
    }
}
