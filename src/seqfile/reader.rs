//! Reader of sequential event files

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    config::DEFAULT_MAX_MESSAGE_SIZE,
    error::{EventRingError, Result},
    message::{EventMessage, HEADER_LEN},
};

use super::{check_unfinished_frame, index::FrameIndex, FRAME_PREFIX_LEN};

/// Reads frames back in write order.
///
/// A frame cut short by the end of the file (a writer that died mid-append)
/// ends the stream, provided the start of its message agrees with the length
/// prefix. A frame that cannot be read although the file is long enough, or
/// whose prefix is implausible, is a `CorruptStream` error.
#[derive(Debug)]
pub struct SeqFileReader {
    file: BufReader<File>,
    path: PathBuf,
    offset: u64,
    /// Frames starting at or after this offset are not read
    end: u64,
    max_frame_len: usize,
    frames_read: u64,
}

impl SeqFileReader {
    /// Open a file for reading from the beginning
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_range(path, 0, u64::MAX)
    }

    /// Read only the frames whose start offset lies in `[start, end)`.
    ///
    /// `start` must be a frame boundary, as produced by `FrameIndex`.
    pub fn open_range(path: impl AsRef<Path>, start: u64, end: u64) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            EventRingError::resource(format!("Failed to open {}: {}", path.display(), e))
        })?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| EventRingError::from_io(e, "Failed to seek sequential file"))?;
        debug!(
            "reading {} from byte {} to {}",
            path.display(),
            start,
            end
        );

        Ok(Self {
            file: BufReader::new(file),
            path: path.to_path_buf(),
            offset: start,
            end,
            max_frame_len: DEFAULT_MAX_MESSAGE_SIZE,
            frames_read: 0,
        })
    }

    /// Largest frame accepted before the stream is considered corrupt
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next frame
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn file_len(&self) -> Result<u64> {
        Ok(self
            .file
            .get_ref()
            .metadata()
            .map_err(|e| EventRingError::from_io(e, "Failed to stat sequential file"))?
            .len())
    }

    /// Read the next message; `Ok(None)` is the end of the stream
    pub fn read_next(&mut self) -> Result<Option<EventMessage>> {
        match self.next_frame()? {
            Some(bytes) => {
                let offset = self.offset;
                let message = EventMessage::from_bytes(bytes).map_err(|e| {
                    EventRingError::corrupt_stream(offset, format!("invalid message: {}", e))
                })?;
                self.commit_frame(message.len());
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Read the next frame without interpreting it
    pub fn read_next_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next_frame()? {
            Some(bytes) => {
                self.commit_frame(bytes.len());
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    fn commit_frame(&mut self, len: usize) {
        self.offset += (FRAME_PREFIX_LEN + len) as u64;
        self.frames_read += 1;
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.end {
            return Ok(None);
        }

        let file_len = self.file_len()?;
        let remaining = file_len.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < FRAME_PREFIX_LEN as u64 {
            warn!(
                "{}: ignoring {} trailing bytes of a truncated frame prefix",
                self.path.display(),
                remaining
            );
            return Ok(None);
        }

        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        self.read_exact_at_offset(&mut prefix)?;
        let len = u32::from_le_bytes(prefix) as usize;

        if len < HEADER_LEN || len > self.max_frame_len {
            return Err(EventRingError::corrupt_stream(
                self.offset,
                format!("implausible frame length {}", len),
            ));
        }
        if remaining < (FRAME_PREFIX_LEN + len) as u64 {
            let available = (remaining - FRAME_PREFIX_LEN as u64).min(HEADER_LEN as u64) as usize;
            let mut tail = vec![0u8; available];
            self.read_exact_at_offset(&mut tail)?;
            check_unfinished_frame(self.offset, len, &tail)?;
            warn!(
                "{}: final frame at byte {} is truncated ({} of {} bytes)",
                self.path.display(),
                self.offset,
                remaining - FRAME_PREFIX_LEN as u64,
                len
            );
            // stay on the frame boundary in case the writer completes it later
            self.file
                .seek(SeekFrom::Start(self.offset))
                .map_err(|e| EventRingError::from_io(e, "Failed to seek sequential file"))?;
            return Ok(None);
        }

        let mut bytes = vec![0u8; len];
        self.read_exact_at_offset(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn read_exact_at_offset(&mut self, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset;
        self.file.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                EventRingError::corrupt_stream(offset, "short read inside the file")
            }
            _ => EventRingError::from_io(e, "Failed to read sequential file"),
        })
    }

    /// Scan frame boundaries of a file without decoding messages
    pub fn index(path: impl AsRef<Path>) -> Result<FrameIndex> {
        FrameIndex::scan(path)
    }
}

impl Iterator for SeqFileReader {
    type Item = Result<EventMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
