//! Library-wide defaults and serde helpers shared by the config structs

/// Default ring capacity in 32-bit words (1 MiB of payload space)
pub const DEFAULT_RING_CAPACITY_WORDS: usize = 262_144;

/// Default upper bound for a serialized event message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default occupancy fraction above which a ring is considered congested
pub const DEFAULT_RED_ZONE: f64 = 0.8;

/// Serialize a `Duration` as whole milliseconds
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serialize an optional `Duration` as whole milliseconds.
///
/// TOML has no null, so `0` stands for `None` (unbounded) in both directions.
pub mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.map_or(0, |d| d.as_millis() as u64))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(|ms| match ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        })
    }
}
