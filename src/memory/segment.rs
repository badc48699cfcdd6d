//! File-backed shared memory segment with explicit ownership

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use memmap2::{MmapMut, MmapOptions};

use crate::error::{EventRingError, Result};

use super::config::SegmentConfig;

/// Relationship between a process and a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    /// Created the segment and is the only handle allowed to unlink it
    Owner,
    /// Attached to an existing segment; may only detach
    Attached,
}

/// A named, memory-mapped segment shared between processes
#[derive(Debug)]
pub struct SharedSegment {
    name: String,
    path: PathBuf,
    role: SegmentRole,
    /// Memory mapping (MAP_SHARED over the backing file)
    mmap: MmapMut,
    _file: File,
    unlinked: bool,
}

impl SharedSegment {
    /// Create a new segment; fails if one with the same name already exists
    pub fn create(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => EventRingError::resource(format!(
                    "Segment {} already exists at {}",
                    config.name,
                    path.display()
                )),
                _ => EventRingError::resource(format!(
                    "Failed to create segment file {}: {}",
                    path.display(),
                    e
                )),
            })?;

        if let Err(e) = file.set_len(config.size as u64) {
            let _ = std::fs::remove_file(&path);
            return Err(EventRingError::resource(format!(
                "Failed to size segment {} to {} bytes: {}",
                config.name, config.size, e
            )));
        }

        let mmap = match Self::map(&file, config.size) {
            Ok(mmap) => mmap,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        info!(
            "created segment {} ({} bytes) at {}",
            config.name,
            config.size,
            path.display()
        );

        Ok(Self {
            name: config.name.clone(),
            path,
            role: SegmentRole::Owner,
            mmap,
            _file: file,
            unlinked: false,
        })
    }

    /// Attach to an existing segment; the size must match the configuration
    pub fn attach(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                EventRingError::resource(format!(
                    "Failed to attach segment {} at {}: {}",
                    config.name,
                    path.display(),
                    e
                ))
            })?;

        let actual = file
            .metadata()
            .map_err(|e| EventRingError::from_io(e, "Failed to stat segment file"))?
            .len();

        if actual != config.size as u64 {
            return Err(EventRingError::invalid_parameter(
                "size",
                format!(
                    "Segment {} has {} bytes but {} were requested",
                    config.name, actual, config.size
                ),
            ));
        }

        let mmap = Self::map(&file, config.size)?;
        debug!("attached segment {} at {}", config.name, path.display());

        Ok(Self {
            name: config.name.clone(),
            path,
            role: SegmentRole::Attached,
            mmap,
            _file: file,
            unlinked: false,
        })
    }

    /// Attach to the segment, creating it if absent.
    ///
    /// Exactly one of several racing callers becomes the owner.
    pub fn open(config: &SegmentConfig) -> Result<Self> {
        match Self::create(config) {
            Ok(segment) => Ok(segment),
            Err(EventRingError::Resource { .. }) if config.path().exists() => Self::attach(config),
            Err(e) => Err(e),
        }
    }

    fn map(file: &File, size: usize) -> Result<MmapMut> {
        // SAFETY: the file was sized to `size` bytes by the owner; all processes
        // mapping it agree on that size and only touch it through the ring header
        // protocol.
        unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(file)
                .map_err(|e| EventRingError::resource(format!("Failed to map segment: {}", e)))
        }
    }

    /// Name of the segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Role of this handle
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    /// Whether this handle owns the segment lifecycle
    pub fn is_owner(&self) -> bool {
        self.role == SegmentRole::Owner
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Base pointer of the mapping.
    ///
    /// The mapping is shared with other processes, so all access through this
    /// pointer must follow the atomic protocol of the structure living in it.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Flush the mapping to the backing file
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| EventRingError::from_io(e, "Failed to flush segment"))
    }

    /// Remove the backing file. Only the owner may do this.
    pub fn unlink(&mut self) -> Result<()> {
        if self.role != SegmentRole::Owner {
            return Err(EventRingError::invalid_parameter(
                "role",
                format!("Segment {} is attached, only its owner may unlink it", self.name),
            ));
        }
        if self.unlinked {
            return Ok(());
        }
        std::fs::remove_file(&self.path)
            .map_err(|e| EventRingError::from_io(e, "Failed to unlink segment"))?;
        self.unlinked = true;
        info!("unlinked segment {}", self.name);
        Ok(())
    }

    /// Remove a segment file left behind by a dead owner
    pub fn remove_stale(config: &SegmentConfig) -> Result<()> {
        config.validate()?;
        let path = config.path();
        std::fs::remove_file(&path).map_err(|e| {
            EventRingError::from_io(e, &format!("Failed to remove {}", path.display()))
        })?;
        warn!("removed stale segment {} at {}", config.name, path.display());
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if self.role == SegmentRole::Owner && !self.unlinked {
            if let Err(e) = self.unlink() {
                warn!("failed to unlink segment {} on drop: {}", self.name, e);
            }
        }
    }
}

// SAFETY: the mapping is plain shared memory; concurrent access is mediated by
// the atomics of the structure placed in it.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_attach_and_unlink() {
        let temp_dir = TempDir::new().unwrap();
        let config = SegmentConfig::new("seg", 4096).with_dir(temp_dir.path());

        let owner = SharedSegment::create(&config).unwrap();
        assert!(owner.is_owner());
        assert_eq!(owner.len(), 4096);

        let attached = SharedSegment::attach(&config).unwrap();
        assert_eq!(attached.role(), SegmentRole::Attached);
        drop(attached);
        assert!(config.path().exists());

        drop(owner);
        assert!(!config.path().exists());
    }

    #[test]
    fn test_create_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = SegmentConfig::new("dup", 1024).with_dir(temp_dir.path());

        let _owner = SharedSegment::create(&config).unwrap();
        let err = SharedSegment::create(&config).unwrap_err();
        assert!(matches!(err, EventRingError::Resource { .. }));

        let second = SharedSegment::open(&config).unwrap();
        assert!(!second.is_owner());
    }

    #[test]
    fn test_attached_cannot_unlink() {
        let temp_dir = TempDir::new().unwrap();
        let config = SegmentConfig::new("guarded", 1024).with_dir(temp_dir.path());

        let _owner = SharedSegment::create(&config).unwrap();
        let mut attached = SharedSegment::attach(&config).unwrap();
        assert!(attached.unlink().is_err());
        assert!(config.path().exists());
    }

    #[test]
    fn test_attach_size_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let config = SegmentConfig::new("sized", 1024).with_dir(temp_dir.path());
        let _owner = SharedSegment::create(&config).unwrap();

        let wrong = SegmentConfig::new("sized", 2048).with_dir(temp_dir.path());
        assert!(SharedSegment::attach(&wrong).is_err());
    }
}
