//! Append-only writer of length-prefixed event messages

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    error::{EventRingError, Result},
    message::EventMessage,
};

use super::FRAME_PREFIX_LEN;

/// Writes event messages to a flat file, one frame per message
#[derive(Debug)]
pub struct SeqFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    /// Byte offset where the next frame starts
    offset: u64,
    frames_written: u64,
}

impl SeqFileWriter {
    /// Create (or truncate) a sequential file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            EventRingError::resource(format!("Failed to create {}: {}", path.display(), e))
        })?;
        info!("writing sequential file {}", path.display());
        Ok(Self::from_file(file, path, 0))
    }

    /// Open an existing file and append after its last byte
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                EventRingError::resource(format!("Failed to open {}: {}", path.display(), e))
            })?;
        let offset = file
            .metadata()
            .map_err(|e| EventRingError::from_io(e, "Failed to stat sequential file"))?
            .len();
        info!(
            "appending to sequential file {} at byte {}",
            path.display(),
            offset
        );
        Ok(Self::from_file(file, path, offset))
    }

    fn from_file(file: File, path: &Path, offset: u64) -> Self {
        Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            offset,
            frames_written: 0,
        }
    }

    /// Append one message; returns the byte offset of its frame
    pub fn append(&mut self, message: &EventMessage) -> Result<u64> {
        self.append_bytes(message.as_bytes())
    }

    /// Append one already-encoded message
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            EventRingError::encoding(format!("Frame of {} bytes is too large", bytes.len()))
        })?;

        let start = self.offset;
        self.file
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.file.write_all(bytes))
            .map_err(|e| EventRingError::from_io(e, "Failed to append frame"))?;

        self.offset += (FRAME_PREFIX_LEN + bytes.len()) as u64;
        self.frames_written += 1;
        Ok(start)
    }

    /// Make every appended frame durable
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| EventRingError::from_io(e, "Failed to flush sequential file"))?;
        self.file
            .get_ref()
            .sync_data()
            .map_err(|e| EventRingError::from_io(e, "Failed to sync sequential file"))
    }

    /// Flush and close the file
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        debug!(
            "closed {} after {} frames ({} bytes)",
            self.path.display(),
            self.frames_written,
            self.offset
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames appended through this writer
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Size of the file once buffered bytes are flushed
    pub fn len(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }
}
