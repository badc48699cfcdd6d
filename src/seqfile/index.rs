//! Frame boundaries of a sequential file, for parallel playback

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    ops::Range,
    path::Path,
};

use crate::{
    error::{EventRingError, Result},
    message::HEADER_LEN,
};

use super::{check_unfinished_frame, FRAME_PREFIX_LEN};

/// Start offsets of every complete frame in a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameIndex {
    offsets: Vec<u64>,
    /// End of the last complete frame
    end: u64,
}

impl FrameIndex {
    /// Walk the length prefixes of `path`.
    ///
    /// A truncated final frame is left out; a prefix that points past the end
    /// of the file but disagrees with its message header is `CorruptStream`.
    pub fn scan(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            EventRingError::resource(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let file_len = file
            .metadata()
            .map_err(|e| EventRingError::from_io(e, "Failed to stat sequential file"))?
            .len();
        let mut file = BufReader::new(file);

        let mut offsets = Vec::new();
        let mut offset = 0u64;
        while offset + FRAME_PREFIX_LEN as u64 <= file_len {
            let mut prefix = [0u8; FRAME_PREFIX_LEN];
            file.read_exact(&mut prefix)
                .map_err(|e| EventRingError::corrupt_stream(offset, e.to_string()))?;
            let len = u32::from_le_bytes(prefix) as usize;
            if len < HEADER_LEN {
                return Err(EventRingError::corrupt_stream(
                    offset,
                    format!("implausible frame length {}", len),
                ));
            }
            let next = offset + (FRAME_PREFIX_LEN + len) as u64;
            if next > file_len {
                let available = (file_len - offset - FRAME_PREFIX_LEN as u64)
                    .min(HEADER_LEN as u64) as usize;
                let mut tail = vec![0u8; available];
                file.read_exact(&mut tail)
                    .map_err(|e| EventRingError::corrupt_stream(offset, e.to_string()))?;
                check_unfinished_frame(offset, len, &tail)?;
                break;
            }
            offsets.push(offset);
            file.seek(SeekFrom::Start(next))
                .map_err(|e| EventRingError::from_io(e, "Failed to seek sequential file"))?;
            offset = next;
        }

        Ok(Self {
            offsets,
            end: offset,
        })
    }

    /// Number of complete frames
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Byte just past the last complete frame
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Split into at most `parts` disjoint, frame-aligned byte ranges with
    /// frame counts differing by at most one
    pub fn split(&self, parts: usize) -> Vec<Range<u64>> {
        let frames = self.offsets.len();
        let parts = parts.max(1).min(frames);
        if parts == 0 {
            return Vec::new();
        }

        let base = frames / parts;
        let extra = frames % parts;
        let mut ranges = Vec::with_capacity(parts);
        let mut first = 0;
        for part in 0..parts {
            let count = base + usize::from(part < extra);
            let last = first + count;
            let start = self.offsets[first];
            let end = self.offsets.get(last).copied().unwrap_or(self.end);
            ranges.push(start..end);
            first = last;
        }
        ranges
    }
}
