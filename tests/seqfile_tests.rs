//! Sequential file integration tests
//! Crash-tolerant reopen, byte-exact replay, frame-aligned parallel playback

use std::{
    collections::BTreeSet,
    fs::OpenOptions,
    io::{Seek, SeekFrom, Write},
};

use eventring::{
    error::EventRingError,
    message::{EventId, EventMeta, MessageHandler, Record, RecordSet},
    seqfile::{FrameIndex, SeqFileReader, SeqFileWriter},
};
use tempfile::TempDir;

fn message(handler: &MessageHandler, event: u64) -> Vec<u8> {
    let mut records = RecordSet::new();
    records
        .insert(Record::new("adc", 7, vec![event as u8; (event % 97) as usize]))
        .unwrap();
    handler
        .serialize(EventMeta::event(EventId::new(3, 9, event)), &records)
        .unwrap()
        .into_bytes()
}

#[test]
fn test_reopen_after_writer_vanished() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run9.seq");
    let handler = MessageHandler::default();

    let written: Vec<Vec<u8>> = (0..500).map(|i| message(&handler, i)).collect();
    let mut writer = SeqFileWriter::create(&path).unwrap();
    for bytes in &written {
        writer.append_bytes(bytes).unwrap();
    }
    writer.flush().unwrap();
    // the process dies without closing the writer
    std::mem::forget(writer);

    let mut reader = SeqFileReader::open(&path).unwrap();
    for expected in &written {
        let frame = reader.read_next_bytes().unwrap().unwrap();
        assert_eq!(&frame, expected);
    }
    assert!(reader.read_next_bytes().unwrap().is_none());
    assert_eq!(reader.frames_read(), 500);
}

#[test]
fn test_partial_tail_is_end_of_stream() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial.seq");
    let handler = MessageHandler::default();

    let mut writer = SeqFileWriter::create(&path).unwrap();
    for i in 0..3 {
        writer.append_bytes(&message(&handler, i)).unwrap();
    }
    writer.close().unwrap();

    // half of a fourth frame, as if the writer crashed mid-append
    let next = message(&handler, 3);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&(next.len() as u32).to_le_bytes()).unwrap();
    file.write_all(&next[..next.len() / 2]).unwrap();
    drop(file);

    let frames: Vec<_> = SeqFileReader::open(&path)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].header().id.event, 2);
}

#[test]
fn test_corrupt_length_reports_offset() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("corrupt.seq");
    let handler = MessageHandler::default();

    let first = message(&handler, 0);
    let mut writer = SeqFileWriter::create(&path).unwrap();
    writer.append_bytes(&first).unwrap();
    writer.close().unwrap();

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&7u32.to_le_bytes()).unwrap();
    file.write_all(&[0u8; 7]).unwrap();
    drop(file);

    let mut reader = SeqFileReader::open(&path).unwrap();
    assert!(reader.read_next().unwrap().is_some());
    match reader.read_next() {
        Err(EventRingError::CorruptStream { offset, .. }) => {
            assert_eq!(offset, 4 + first.len() as u64)
        }
        other => panic!("expected CorruptStream, got {:?}", other),
    }
}

#[test]
fn test_damaged_prefix_mid_file_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("damaged.seq");
    let handler = MessageHandler::default();

    let written: Vec<Vec<u8>> = (0..10).map(|i| message(&handler, i)).collect();
    let mut writer = SeqFileWriter::create(&path).unwrap();
    for bytes in &written {
        writer.append_bytes(bytes).unwrap();
    }
    writer.close().unwrap();

    // inflate the fourth frame's length by about 1 MiB, past the end of the file
    let fourth: u64 = written[..3].iter().map(|b| 4 + b.len() as u64).sum();
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(fourth + 2)).unwrap();
    file.write_all(&[0x10]).unwrap();
    drop(file);

    let mut reader = SeqFileReader::open(&path).unwrap();
    for expected in &written[..3] {
        assert_eq!(&reader.read_next_bytes().unwrap().unwrap(), expected);
    }
    match reader.read_next_bytes() {
        Err(EventRingError::CorruptStream { offset, .. }) => assert_eq!(offset, fourth),
        other => panic!("expected CorruptStream, got {:?}", other),
    }

    match FrameIndex::scan(&path) {
        Err(EventRingError::CorruptStream { offset, .. }) => assert_eq!(offset, fourth),
        other => panic!("expected CorruptStream, got {:?}", other),
    }
}

#[test]
fn test_unfinished_final_frame_is_left_out_of_index() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("unfinished.seq");
    let handler = MessageHandler::default();

    let mut writer = SeqFileWriter::create(&path).unwrap();
    for i in 0..5 {
        writer.append_bytes(&message(&handler, i)).unwrap();
    }
    writer.close().unwrap();
    let complete = std::fs::metadata(&path).unwrap().len();

    let next = message(&handler, 5);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&(next.len() as u32).to_le_bytes()).unwrap();
    file.write_all(&next[..next.len() - 3]).unwrap();
    drop(file);

    let index = FrameIndex::scan(&path).unwrap();
    assert_eq!(index.len(), 5);
    assert_eq!(index.end(), complete);

    let frames = SeqFileReader::open(&path).unwrap().count();
    assert_eq!(frames, 5);
}

#[test]
fn test_split_ranges_replay_every_frame_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("parallel.seq");
    let handler = MessageHandler::default();

    let mut writer = SeqFileWriter::create(&path).unwrap();
    for i in 0..101 {
        writer.append_bytes(&message(&handler, i)).unwrap();
    }
    writer.close().unwrap();

    let index = FrameIndex::scan(&path).unwrap();
    assert_eq!(index.len(), 101);

    let mut seen = BTreeSet::new();
    for range in index.split(4) {
        let reader = SeqFileReader::open_range(&path, range.start, range.end).unwrap();
        for message in reader {
            let event = message.unwrap().header().id.event;
            assert!(seen.insert(event), "event {} replayed twice", event);
        }
    }
    assert_eq!(seen, (0..101).collect());
}

#[test]
fn test_append_continues_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("append.seq");
    let handler = MessageHandler::default();

    let mut writer = SeqFileWriter::create(&path).unwrap();
    writer.append_bytes(&message(&handler, 0)).unwrap();
    writer.close().unwrap();

    let mut writer = SeqFileWriter::append_to(&path).unwrap();
    writer.append_bytes(&message(&handler, 1)).unwrap();
    writer.close().unwrap();

    let events: Vec<u64> = SeqFileReader::open(&path)
        .unwrap()
        .map(|m| m.unwrap().header().id.event)
        .collect();
    assert_eq!(events, vec![0, 1]);
}
