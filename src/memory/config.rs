//! Configuration types for shared memory segments

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EventRingError, Result};

/// Prefix of every segment file so stray files are easy to identify
pub const SEGMENT_FILE_PREFIX: &str = "eventring_";

/// Directory used for segment files when none is configured.
///
/// `/dev/shm` keeps segments in RAM on Linux; elsewhere the system temp dir is used.
pub fn default_segment_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Configuration for creating or attaching to a shared memory segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Process-visible name of the segment
    pub name: String,
    /// Total size of the segment in bytes
    pub size: usize,
    /// Directory holding the backing file
    pub dir: Option<PathBuf>,
    /// Permissions for the backing file (Unix permissions)
    pub permissions: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            dir: None,
            permissions: 0o660,
        }
    }
}

impl SegmentConfig {
    /// Create a new segment configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the directory of the backing file
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set the permissions of the backing file
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EventRingError::invalid_parameter(
                "name",
                "Segment name cannot be empty",
            ));
        }

        if self.name.contains('/') || self.name.contains('\0') {
            return Err(EventRingError::invalid_parameter(
                "name",
                format!("Segment name '{}' contains '/' or NUL", self.name),
            ));
        }

        if self.size == 0 {
            return Err(EventRingError::invalid_parameter(
                "size",
                "Segment size must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Path of the backing file for this segment
    pub fn path(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(default_segment_dir)
            .join(format!("{}{}", SEGMENT_FILE_PREFIX, self.name))
    }
}
