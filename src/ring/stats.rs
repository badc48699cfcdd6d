//! Ring buffer statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-handle counters (local to this process)
#[derive(Debug, Default)]
pub struct RingStats {
    /// Frames inserted through this handle
    pub frames_inserted: AtomicU64,
    /// Frames removed through this handle
    pub frames_removed: AtomicU64,
    /// Payload words inserted through this handle
    pub words_inserted: AtomicU64,
    /// Payload words removed through this handle
    pub words_removed: AtomicU64,
    /// Inserts rejected because the ring was full
    pub full_count: AtomicU64,
    /// Removes that found the ring empty
    pub empty_count: AtomicU64,
}

impl RingStats {
    /// Record a successful insert
    pub fn record_inserted(&self, payload_words: usize) {
        self.frames_inserted.fetch_add(1, Ordering::Relaxed);
        self.words_inserted
            .fetch_add(payload_words as u64, Ordering::Relaxed);
    }

    /// Record a successful remove
    pub fn record_removed(&self, payload_words: usize) {
        self.frames_removed.fetch_add(1, Ordering::Relaxed);
        self.words_removed
            .fetch_add(payload_words as u64, Ordering::Relaxed);
    }

    /// Record a full condition
    pub fn record_full(&self) {
        self.full_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an empty condition
    pub fn record_empty(&self) {
        self.empty_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of the shared header, as seen by any attached process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingStatus {
    pub name: String,
    pub capacity_words: u64,
    pub used_words: u64,
    pub queued_frames: u64,
    pub ninsq: u64,
    pub nremq: u64,
    pub nattached: u32,
    pub owner_pid: u32,
    pub write_cursor: u64,
    pub read_cursor: u64,
}

impl RingStatus {
    /// Fraction of the capacity currently occupied
    pub fn utilization(&self) -> f64 {
        if self.capacity_words == 0 {
            0.0
        } else {
            self.used_words as f64 / self.capacity_words as f64
        }
    }
}

impl std::fmt::Display for RingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: capacity={} used={} ({:.1}%) nbuf={} ninsq={} nremq={} wptr={} rptr={} attached={} owner={}",
            self.name,
            self.capacity_words,
            self.used_words,
            self.utilization() * 100.0,
            self.queued_frames,
            self.ninsq,
            self.nremq,
            self.write_cursor,
            self.read_cursor,
            self.nattached,
            self.owner_pid
        )
    }
}
