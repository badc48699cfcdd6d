//! Sequential file endpoints, for spooling and offline replay

use std::{ops::Range, path::PathBuf};

use crate::{
    error::{EventRingError, Result},
    seqfile::{SeqFileReader, SeqFileWriter},
};

/// Appends messages to a sequential file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    name: String,
    append: bool,
    writer: Option<SeqFileWriter>,
}

impl FileSink {
    /// Truncate `path` on open
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), false)
    }

    /// Keep the existing frames of `path` and append after them
    pub fn append(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), true)
    }

    fn new(path: PathBuf, append: bool) -> Self {
        Self {
            name: path.display().to_string(),
            path,
            append,
            writer: None,
        }
    }

    fn writer(&mut self) -> Result<&mut SeqFileWriter> {
        self.writer.as_mut().ok_or_else(|| {
            EventRingError::connection(format!("File sink {} is not open", self.name))
        })
    }
}

impl super::MessageSink for FileSink {
    fn channel(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let writer = if self.append {
            SeqFileWriter::append_to(&self.path)?
        } else {
            SeqFileWriter::create(&self.path)?
        };
        self.writer = Some(writer);
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.writer()?.append_bytes(message).map(|_| ())
    }

    fn flush(&mut self) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

/// Replays messages from a sequential file, optionally a frame-aligned byte range
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    range: Option<Range<u64>>,
    reader: Option<SeqFileReader>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            range: None,
            reader: None,
        }
    }

    /// Only replay frames starting in `range`
    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }
}

impl super::MessageSource for FileSource {
    fn channel(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let reader = match &self.range {
            Some(range) => SeqFileReader::open_range(&self.path, range.start, range.end)?,
            None => SeqFileReader::open(&self.path)?,
        };
        self.reader = Some(reader);
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_next_bytes(),
            None => Err(EventRingError::connection(format!(
                "File source {} is not open",
                self.name
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
