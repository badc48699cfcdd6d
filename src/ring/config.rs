//! Ring buffer channel configuration

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    error::{EventRingError, Result},
    memory::SegmentConfig,
};

use super::header::{FRAME_OVERHEAD_WORDS, HEADER_SIZE};

/// Configuration of a ring buffer channel.
///
/// All processes attaching to one channel must agree on `name` and
/// `capacity_words`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Channel name
    pub name: String,
    /// Capacity of the data region in 32-bit words
    pub capacity_words: usize,
    /// Directory holding the segment file
    pub dir: Option<PathBuf>,
    /// How long an insert/remove waits for an earlier in-flight peer to commit
    #[serde(with = "crate::config::millis")]
    pub commit_timeout: Duration,
    /// How long an attacher waits for the owner to finish initialising the header
    #[serde(with = "crate::config::millis")]
    pub attach_timeout: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            capacity_words: crate::config::DEFAULT_RING_CAPACITY_WORDS,
            dir: None,
            commit_timeout: Duration::from_secs(1),
            attach_timeout: Duration::from_secs(2),
        }
    }
}

impl RingConfig {
    /// Create a new ring configuration
    pub fn new(name: impl Into<String>, capacity_words: usize) -> Self {
        Self {
            name: name.into(),
            capacity_words,
            ..Default::default()
        }
    }

    /// Set the directory of the segment file
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set the commit timeout
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Set the attach timeout
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// Largest payload (in words) a single frame may carry.
    ///
    /// A frame may occupy at most half the ring so that a frame needing a pad
    /// always fits into an empty ring.
    pub fn max_payload_words(&self) -> usize {
        (self.capacity_words / 2).saturating_sub(FRAME_OVERHEAD_WORDS)
    }

    /// Size of the backing segment in bytes
    pub fn segment_size(&self) -> usize {
        HEADER_SIZE + self.capacity_words * 4
    }

    /// Segment configuration backing this channel
    pub fn segment_config(&self) -> SegmentConfig {
        let config = SegmentConfig::new(self.name.clone(), self.segment_size());
        match &self.dir {
            Some(dir) => config.with_dir(dir.clone()),
            None => config,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EventRingError::invalid_parameter(
                "name",
                "Channel name cannot be empty",
            ));
        }

        if self.capacity_words < 4 * FRAME_OVERHEAD_WORDS {
            return Err(EventRingError::invalid_parameter(
                "capacity_words",
                format!(
                    "Capacity must be at least {} words",
                    4 * FRAME_OVERHEAD_WORDS
                ),
            ));
        }

        // byte lengths of the largest frame must fit the 32-bit length word
        if self.capacity_words > (u32::MAX / 4) as usize {
            return Err(EventRingError::invalid_parameter(
                "capacity_words",
                format!("Capacity must not exceed {} words", u32::MAX / 4),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_payload_is_half_ring() {
        let config = RingConfig::new("r", 1024);
        assert_eq!(config.max_payload_words(), 510);
        assert_eq!(config.segment_size(), HEADER_SIZE + 4096);
    }

    #[test]
    fn test_validate() {
        assert!(RingConfig::new("", 1024).validate().is_err());
        assert!(RingConfig::new("r", 4).validate().is_err());
        assert!(RingConfig::new("r", 1024).validate().is_ok());
    }
}
