//! Flat files of consecutive event messages
//!
//! Each frame is a little-endian u32 byte length followed by one encoded
//! message. There is no file header, so files can be concatenated and split
//! at any frame boundary.

pub mod index;
pub mod reader;
pub mod writer;

pub use index::FrameIndex;
pub use reader::SeqFileReader;
pub use writer::SeqFileWriter;

use crate::{
    error::{EventRingError, Result},
    message::{EventHeader, HEADER_LEN, MESSAGE_MAGIC},
};

/// Bytes of the length prefix in front of every frame
pub const FRAME_PREFIX_LEN: usize = 4;

/// Tell an unfinished final append from a damaged length prefix.
///
/// `tail` holds the bytes present after the prefix of a frame at `offset`
/// that runs past the end of the file. The frame may only end the stream if
/// whatever part of its message header is present agrees with the prefix.
pub(crate) fn check_unfinished_frame(offset: u64, len: usize, tail: &[u8]) -> Result<()> {
    if tail.len() >= HEADER_LEN {
        let header = EventHeader::decode(tail).map_err(|e| {
            EventRingError::corrupt_stream(
                offset,
                format!("frame runs past the end of the file with an invalid header: {}", e),
            )
        })?;
        if header.total_len as usize != len {
            return Err(EventRingError::corrupt_stream(
                offset,
                format!(
                    "length prefix {} disagrees with message length {}",
                    len, header.total_len
                ),
            ));
        }
        return Ok(());
    }

    if tail.len() >= 4 {
        let declared = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
        if declared != len {
            return Err(EventRingError::corrupt_stream(
                offset,
                format!(
                    "length prefix {} disagrees with message length {}",
                    len, declared
                ),
            ));
        }
    }
    if tail.len() >= 8 {
        let magic = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);
        if magic != MESSAGE_MAGIC {
            return Err(EventRingError::corrupt_stream(
                offset,
                format!("invalid message magic {:#010x} in final frame", magic),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::error::EventRingError;
    use crate::message::{EventId, EventMeta, MessageHandler, Record, RecordSet};

    fn message(handler: &MessageHandler, event: u64) -> crate::message::EventMessage {
        let mut records = RecordSet::new();
        records
            .insert(Record::new("payload", 1, vec![event as u8; (event % 13) as usize]))
            .unwrap();
        handler
            .serialize(EventMeta::event(EventId::new(1, 1, event)), &records)
            .unwrap()
    }

    #[test]
    fn test_write_then_read_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.seq");
        let handler = MessageHandler::default();

        let mut writer = SeqFileWriter::create(&path).unwrap();
        let originals: Vec<_> = (0..20).map(|i| message(&handler, i)).collect();
        for m in &originals {
            writer.append(m).unwrap();
        }
        assert_eq!(writer.frames_written(), 20);
        writer.close().unwrap();

        let reader = SeqFileReader::open(&path).unwrap();
        let read: Vec<_> = reader.map(|m| m.unwrap()).collect();
        assert_eq!(read, originals);
    }

    #[test]
    fn test_truncated_final_frame_is_end_of_stream() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cut.seq");
        let handler = MessageHandler::default();

        let mut writer = SeqFileWriter::create(&path).unwrap();
        writer.append(&message(&handler, 1)).unwrap();
        writer.append(&message(&handler, 2)).unwrap();
        writer.close().unwrap();

        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 3]).unwrap();

        let mut reader = SeqFileReader::open(&path).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        assert!(reader.read_next().unwrap().is_none());
        assert!(reader.read_next().unwrap().is_none());
        assert_eq!(SeqFileReader::index(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_unfinished_frame_must_match_its_header() {
        let handler = MessageHandler::default();
        let bytes = message(&handler, 5).into_bytes();
        let len = bytes.len();

        assert!(check_unfinished_frame(0, len, &bytes[..2]).is_ok());
        assert!(check_unfinished_frame(0, len, &bytes[..10]).is_ok());
        assert!(check_unfinished_frame(0, len, &bytes[..HEADER_LEN]).is_ok());

        // prefix and embedded length disagree
        assert!(matches!(
            check_unfinished_frame(40, len + 1_000, &bytes[..6]),
            Err(EventRingError::CorruptStream { offset: 40, .. })
        ));
        assert!(check_unfinished_frame(40, len + 1_000, &bytes[..HEADER_LEN]).is_err());

        let mut bad_magic = bytes[..12].to_vec();
        bad_magic[5] ^= 0xff;
        assert!(check_unfinished_frame(0, len, &bad_magic).is_err());
    }

    #[test]
    fn test_implausible_length_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.seq");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&3u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        drop(file);

        let mut reader = SeqFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_next(),
            Err(EventRingError::CorruptStream { offset: 0, .. })
        ));
    }

    #[test]
    fn test_garbage_frame_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.seq");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[0xab; 64]).unwrap();
        drop(file);

        let mut reader = SeqFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_next(),
            Err(EventRingError::CorruptStream { .. })
        ));
    }

    #[test]
    fn test_ranges_cover_every_frame_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("split.seq");
        let handler = MessageHandler::default();

        let mut writer = SeqFileWriter::create(&path).unwrap();
        for i in 0..11 {
            writer.append(&message(&handler, i)).unwrap();
        }
        writer.close().unwrap();

        let index = SeqFileReader::index(&path).unwrap();
        assert_eq!(index.len(), 11);

        let mut events = Vec::new();
        for range in index.split(3) {
            let reader = SeqFileReader::open_range(&path, range.start, range.end).unwrap();
            for m in reader {
                events.push(m.unwrap().header().id.event);
            }
        }
        assert_eq!(events, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_append_to_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("grow.seq");
        let handler = MessageHandler::default();

        let mut writer = SeqFileWriter::create(&path).unwrap();
        writer.append(&message(&handler, 1)).unwrap();
        writer.close().unwrap();

        let mut writer = SeqFileWriter::append_to(&path).unwrap();
        assert!(!writer.is_empty());
        writer.append(&message(&handler, 2)).unwrap();
        writer.close().unwrap();

        assert_eq!(SeqFileReader::open(&path).unwrap().count(), 2);
    }
}
