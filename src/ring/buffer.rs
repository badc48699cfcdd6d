//! Multi-producer multi-consumer frame ring over a shared segment

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info};
use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

use crate::{
    error::{EventRingError, Result},
    memory::{SegmentRole, SharedSegment},
};

use super::{
    config::RingConfig,
    header::{RingHeader, FRAME_OVERHEAD_WORDS, HEADER_SIZE, PAD_MARKER},
    stats::{RingStats, RingStatus},
};

/// Spins before a waiting commit starts yielding and checking its deadline
const SPINS_BEFORE_YIELD: u32 = 64;

/// Reserved span of a frame about to be written
#[derive(Debug, Clone, Copy)]
struct WriteSpan {
    cursor: u64,
    pad: u64,
    total: u64,
}

/// Claimed frame about to be copied out
#[derive(Debug, Clone, Copy)]
struct FrameClaim {
    cursor: u64,
    total: u64,
    start: u64,
    payload_words: usize,
    payload_bytes: usize,
}

/// Decoded frame prefix at a read cursor
#[derive(Debug, Clone, Copy)]
struct FrameLayout {
    pad: u64,
    start: u64,
    payload_words: u64,
    payload_bytes: u64,
}

/// Fixed-capacity circular buffer of 32-bit words shared between processes.
///
/// Frame reservation is a CAS on the shared cursors; the payload copy happens
/// outside of it and is published in reservation order, so concurrent
/// producers never interleave and each frame is delivered to exactly one
/// consumer.
pub struct RingBuffer {
    name: String,
    segment: SharedSegment,
    /// SAFETY: points to the start of the segment mapping, valid while `segment` lives
    header: NonNull<RingHeader>,
    /// SAFETY: points HEADER_SIZE bytes into the mapping, `capacity` words long
    data: NonNull<u32>,
    capacity: u64,
    max_payload_words: usize,
    commit_timeout: Duration,
    stats: RingStats,
    closed: bool,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("role", &self.segment.role())
            .field("used_words", &self.used_words())
            .finish()
    }
}

// SAFETY: all shared state lives behind atomics in the mapped header; payload
// regions are only written after a successful reservation and only read after
// a successful claim.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a new channel. The calling process becomes its owner.
    pub fn create(config: RingConfig) -> Result<Self> {
        config.validate()?;
        let segment = SharedSegment::create(&config.segment_config())?;

        // SAFETY: the segment was just created, is at least HEADER_SIZE bytes and
        // no other process can see an initialised magic yet.
        unsafe {
            RingHeader::initialize(
                segment.as_mut_ptr() as *mut RingHeader,
                config.capacity_words as u64,
            );
        }

        info!(
            "created ring {} with {} words",
            config.name, config.capacity_words
        );
        Self::from_segment(config, segment)
    }

    /// Attach to a channel created by another process
    pub fn attach(config: RingConfig) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();

        // the owner may still be sizing the file
        let segment = loop {
            match SharedSegment::attach(&config.segment_config()) {
                Ok(segment) => break segment,
                Err(EventRingError::InvalidParameter { .. })
                    if started.elapsed() < config.attach_timeout =>
                {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        };

        // SAFETY: the segment is at least HEADER_SIZE bytes (size was checked on attach)
        let header = unsafe { &*(segment.as_mut_ptr() as *const RingHeader) };
        while !header.is_initialized() {
            if started.elapsed() >= config.attach_timeout {
                return Err(EventRingError::timeout(
                    format!("waiting for ring {} to be initialised", config.name),
                    started.elapsed(),
                ));
            }
            thread::sleep(Duration::from_millis(1));
        }

        header.validate(&config.name, config.capacity_words as u64)?;
        header.nattached.fetch_add(1, Ordering::AcqRel);
        debug!("attached ring {}", config.name);

        Self::from_segment(config, segment)
    }

    /// Attach to the channel, creating it if absent
    pub fn open(config: RingConfig) -> Result<Self> {
        config.validate()?;
        match Self::create(config.clone()) {
            Ok(ring) => Ok(ring),
            Err(EventRingError::Resource { .. }) if config.segment_config().path().exists() => {
                Self::attach(config)
            }
            Err(e) => Err(e),
        }
    }

    fn from_segment(config: RingConfig, segment: SharedSegment) -> Result<Self> {
        let base = segment.as_mut_ptr();
        let header = NonNull::new(base as *mut RingHeader)
            .ok_or_else(|| EventRingError::resource("Segment mapping is null"))?;
        // SAFETY: the segment is HEADER_SIZE + capacity * 4 bytes long
        let data = NonNull::new(unsafe { base.add(HEADER_SIZE) } as *mut u32)
            .ok_or_else(|| EventRingError::resource("Segment data region is null"))?;

        Ok(Self {
            max_payload_words: config.max_payload_words(),
            name: config.name,
            segment,
            header,
            data,
            capacity: config.capacity_words as u64,
            commit_timeout: config.commit_timeout,
            stats: RingStats::default(),
            closed: false,
        })
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: header is valid for the lifetime of the segment
        unsafe { self.header.as_ref() }
    }

    fn slot(&self, index: u64) -> *mut u32 {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity keeps the pointer inside the data region
        unsafe { self.data.as_ptr().add(index as usize) }
    }

    fn read_word(&self, index: u64) -> u32 {
        // SAFETY: see `slot`
        unsafe { std::ptr::read_volatile(self.slot(index)) }
    }

    pub(super) fn write_word(&self, index: u64, value: u32) {
        // SAFETY: see `slot`
        unsafe { std::ptr::write_volatile(self.slot(index), value) }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity in words
    pub fn capacity_words(&self) -> usize {
        self.capacity as usize
    }

    /// Largest payload a single frame can carry
    pub fn max_payload_words(&self) -> usize {
        self.max_payload_words
    }

    /// Largest byte frame `insert_bytes` accepts
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_words * 4
    }

    /// Role of this handle
    pub fn role(&self) -> SegmentRole {
        self.segment.role()
    }

    /// Whether this handle owns the channel lifecycle
    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    /// Per-handle statistics
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Words currently occupied (committed and not yet released)
    pub fn used_words(&self) -> usize {
        let header = self.header();
        let rc = header.read_committed.load(Ordering::Acquire);
        let wc = header.write_committed.load(Ordering::Acquire);
        wc.saturating_sub(rc) as usize
    }

    /// Words currently free for reservation
    pub fn free_words(&self) -> usize {
        let header = self.header();
        let rc = header.read_committed.load(Ordering::Acquire);
        let wr = header.write_reserved.load(Ordering::Acquire);
        self.capacity.saturating_sub(wr.saturating_sub(rc)) as usize
    }

    /// Frames inserted and not yet removed
    pub fn queued_frames(&self) -> u64 {
        let header = self.header();
        let removed = header.nremq.load(Ordering::Acquire);
        let inserted = header.ninsq.load(Ordering::Acquire);
        inserted.saturating_sub(removed)
    }

    /// Whether no committed frame is waiting to be claimed
    pub fn is_empty(&self) -> bool {
        let header = self.header();
        let rr = header.read_reserved.load(Ordering::Acquire);
        let wc = header.write_committed.load(Ordering::Acquire);
        rr >= wc
    }

    /// Whether occupancy exceeds `fraction` of the capacity
    pub fn is_above_red_zone(&self, fraction: f64) -> bool {
        self.used_words() as f64 > self.capacity as f64 * fraction
    }

    /// Snapshot of the shared header
    pub fn status(&self) -> RingStatus {
        let header = self.header();
        let read_cursor = header.read_committed.load(Ordering::Acquire);
        let nremq = header.nremq.load(Ordering::Acquire);
        let write_cursor = header.write_committed.load(Ordering::Acquire);
        let ninsq = header.ninsq.load(Ordering::Acquire);

        RingStatus {
            name: self.name.clone(),
            capacity_words: self.capacity,
            used_words: write_cursor.saturating_sub(read_cursor),
            queued_frames: ninsq.saturating_sub(nremq),
            ninsq,
            nremq,
            nattached: header.nattached.load(Ordering::Acquire),
            owner_pid: header.owner_pid,
            write_cursor,
            read_cursor,
        }
    }

    /// Validate the shared header; an error means the channel is unusable
    pub fn check_header(&self) -> Result<()> {
        self.header().validate(&self.name, self.capacity)
    }

    /// Pid of the process that created the channel
    pub fn owner_pid(&self) -> u32 {
        self.header().owner_pid
    }

    /// Whether the creating process is still running
    pub fn is_owner_alive(&self) -> bool {
        let pid = self.header().owner_pid;
        if pid == std::process::id() {
            return true;
        }
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn check_payload(&self, payload_words: usize) -> Result<()> {
        if payload_words > self.max_payload_words {
            return Err(EventRingError::invalid_parameter(
                "payload",
                format!(
                    "Frame of {} words exceeds the limit of {} words for ring {}",
                    payload_words, self.max_payload_words, self.name
                ),
            ));
        }
        Ok(())
    }

    /// Insert one frame of words. Never blocks on a full ring.
    ///
    /// Returns `BufferFull` when the free space is insufficient; the caller
    /// decides whether and how to retry.
    pub fn insert(&self, words: &[u32]) -> Result<()> {
        self.check_payload(words.len())?;
        let span = self.reserve_write(words.len())?;
        let start = self.stamp_pad(&span);

        self.write_word(start, words.len() as u32);
        self.write_word(start + 1, (words.len() * 4) as u32);
        // SAFETY: the reservation covers start + 2 .. start + 2 + len and no
        // other writer or reader touches it until the commit below
        unsafe {
            std::ptr::copy_nonoverlapping(words.as_ptr(), self.slot(start + 2), words.len());
        }

        self.commit_write(&span)?;
        self.stats.record_inserted(words.len());
        Ok(())
    }

    /// Insert one frame of bytes; the byte length travels in the frame prefix
    pub fn insert_bytes(&self, bytes: &[u8]) -> Result<()> {
        let payload_words = bytes.len().div_ceil(4);
        self.check_payload(payload_words)?;
        let span = self.reserve_write(payload_words)?;
        let start = self.stamp_pad(&span);

        self.write_word(start, payload_words as u32);
        self.write_word(start + 1, bytes.len() as u32);
        if payload_words > 0 {
            // zero the last word so its padding bytes are deterministic
            self.write_word(start + 1 + payload_words as u64, 0);
        }
        // SAFETY: as in `insert`; the byte copy stays within the reserved words
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.slot(start + 2) as *mut u8,
                bytes.len(),
            );
        }

        self.commit_write(&span)?;
        self.stats.record_inserted(payload_words);
        Ok(())
    }

    /// Remove the next frame into `out`, returning the number of payload words.
    ///
    /// Returns `BufferEmpty` when no committed frame is available.
    pub fn remove(&self, out: &mut [u32]) -> Result<usize> {
        let claim = self.claim_read(Some(out.len()))?;
        // SAFETY: the claim covers the payload and writers cannot reuse it
        // until it is released
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.slot(claim.start + 2) as *const u32,
                out.as_mut_ptr(),
                claim.payload_words,
            );
        }
        self.release_read(&claim)?;
        self.stats.record_removed(claim.payload_words);
        Ok(claim.payload_words)
    }

    /// Remove the next frame as bytes (trimmed to the byte length it was inserted with)
    pub fn remove_bytes(&self) -> Result<Vec<u8>> {
        let claim = self.claim_read(None)?;
        let mut out = vec![0u8; claim.payload_bytes];
        // SAFETY: as in `remove`
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.slot(claim.start + 2) as *const u8,
                out.as_mut_ptr(),
                claim.payload_bytes,
            );
        }
        self.release_read(&claim)?;
        self.stats.record_removed(claim.payload_words);
        Ok(out)
    }

    fn reserve_write(&self, payload_words: usize) -> Result<WriteSpan> {
        let header = self.header();
        let need = (payload_words + FRAME_OVERHEAD_WORDS) as u64;

        loop {
            let rc = header.read_committed.load(Ordering::Acquire);
            let wr = header.write_reserved.load(Ordering::Acquire);
            if wr < rc {
                return Err(self.fatal(format!(
                    "write cursor {} behind read cursor {}",
                    wr, rc
                )));
            }

            let free = self.capacity.saturating_sub(wr - rc);
            let tail = self.capacity - wr % self.capacity;
            let pad = if need <= tail { 0 } else { tail };
            let total = pad + need;

            if total > free {
                self.stats.record_full();
                return Err(EventRingError::buffer_full(
                    &self.name,
                    total as usize,
                    free as usize,
                ));
            }

            if header
                .write_reserved
                .compare_exchange_weak(wr, wr + total, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(WriteSpan {
                    cursor: wr,
                    pad,
                    total,
                });
            }
            std::hint::spin_loop();
        }
    }

    /// Write the pad marker if needed and return the word index the frame starts at
    fn stamp_pad(&self, span: &WriteSpan) -> u64 {
        let index = span.cursor % self.capacity;
        if span.pad > 0 {
            self.write_word(index, PAD_MARKER);
            0
        } else {
            index
        }
    }

    fn commit_write(&self, span: &WriteSpan) -> Result<()> {
        let header = self.header();
        self.wait_for_turn(&header.write_committed, span.cursor, "insert")?;
        header
            .write_committed
            .store(span.cursor + span.total, Ordering::Release);
        header.ninsq.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn claim_read(&self, max_words: Option<usize>) -> Result<FrameClaim> {
        let header = self.header();

        loop {
            let rr = header.read_reserved.load(Ordering::Acquire);
            let wc = header.write_committed.load(Ordering::Acquire);
            if rr == wc {
                self.stats.record_empty();
                return Err(EventRingError::buffer_empty(&self.name));
            }
            if rr > wc {
                return Err(self.fatal(format!(
                    "read cursor {} ahead of write cursor {}",
                    rr, wc
                )));
            }

            let layout = self.decode_frame_at(rr, wc);

            // Only trust what was read if nobody claimed this frame meanwhile
            if header.read_reserved.load(Ordering::Acquire) != rr {
                std::hint::spin_loop();
                continue;
            }

            let layout = match layout {
                Some(layout) => layout,
                None => {
                    return Err(self.fatal(format!("malformed frame prefix at cursor {}", rr)))
                }
            };

            if let Some(max) = max_words {
                if layout.payload_words as usize > max {
                    return Err(EventRingError::invalid_parameter(
                        "out",
                        format!(
                            "Output buffer of {} words is too small for a {} word frame",
                            max, layout.payload_words
                        ),
                    ));
                }
            }

            let total = layout.pad + FRAME_OVERHEAD_WORDS as u64 + layout.payload_words;
            if header
                .read_reserved
                .compare_exchange_weak(rr, rr + total, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(FrameClaim {
                    cursor: rr,
                    total,
                    start: layout.start,
                    payload_words: layout.payload_words as usize,
                    payload_bytes: layout.payload_bytes as usize,
                });
            }
            std::hint::spin_loop();
        }
    }

    /// Decode the frame prefix at `cursor`; `None` if it is inconsistent
    fn decode_frame_at(&self, cursor: u64, write_committed: u64) -> Option<FrameLayout> {
        let overhead = FRAME_OVERHEAD_WORDS as u64;
        let index = cursor % self.capacity;

        let (pad, start) = if self.read_word(index) == PAD_MARKER {
            (self.capacity - index, 0)
        } else {
            (0, index)
        };
        if start + overhead > self.capacity {
            return None;
        }

        let payload_words = self.read_word(start);
        if payload_words == PAD_MARKER {
            return None;
        }
        let payload_words = payload_words as u64;
        let payload_bytes = self.read_word(start + 1) as u64;

        if start + overhead + payload_words > self.capacity {
            return None;
        }
        if payload_bytes.div_ceil(4) != payload_words {
            return None;
        }
        if cursor + pad + overhead + payload_words > write_committed {
            return None;
        }

        Some(FrameLayout {
            pad,
            start,
            payload_words,
            payload_bytes,
        })
    }

    fn release_read(&self, claim: &FrameClaim) -> Result<()> {
        let header = self.header();
        self.wait_for_turn(&header.read_committed, claim.cursor, "remove")?;
        header
            .read_committed
            .store(claim.cursor + claim.total, Ordering::Release);
        header.nremq.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Wait until earlier reservations have been published
    fn wait_for_turn(&self, cursor: &AtomicU64, expected: u64, operation: &str) -> Result<()> {
        let mut spins = 0u32;
        let mut started: Option<Instant> = None;

        loop {
            let current = cursor.load(Ordering::Acquire);
            if current == expected {
                return Ok(());
            }
            if current > expected {
                return Err(self.fatal(format!(
                    "{} cursor {} overtook reservation {}",
                    operation, current, expected
                )));
            }

            if spins < SPINS_BEFORE_YIELD {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }

            let since = *started.get_or_insert_with(Instant::now);
            if since.elapsed() > self.commit_timeout {
                return Err(self.fatal(format!(
                    "{} stalled: cursor stuck at {} waiting for {}",
                    operation, current, expected
                )));
            }
            thread::yield_now();
        }
    }

    fn fatal(&self, message: String) -> EventRingError {
        error!("ring {} unusable: {}", self.name, message);
        EventRingError::corruption(&self.name, message)
    }

    /// Discard every committed frame. Only the owner may clear, and only while
    /// no transfer is in flight. Returns the number of frames discarded.
    pub fn clear(&self) -> Result<u64> {
        if !self.is_owner() {
            return Err(EventRingError::invalid_parameter(
                "role",
                format!("Only the owner of {} may clear it", self.name),
            ));
        }

        let header = self.header();
        let rc = header.read_committed.load(Ordering::Acquire);
        let rr = header.read_reserved.load(Ordering::Acquire);
        let wc = header.write_committed.load(Ordering::Acquire);
        let wr = header.write_reserved.load(Ordering::Acquire);
        if rc != rr || wc != wr {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot clear {} while transfers are in flight", self.name),
            ));
        }

        if header
            .read_reserved
            .compare_exchange(rr, wc, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot clear {} while transfers are in flight", self.name),
            ));
        }

        // the span [rr, wc) is now ours; count what is being discarded
        let mut cursor = rr;
        let mut frames = 0u64;
        while cursor < wc {
            match self.decode_frame_at(cursor, wc) {
                Some(layout) => {
                    cursor += layout.pad + FRAME_OVERHEAD_WORDS as u64 + layout.payload_words;
                    frames += 1;
                }
                None => {
                    header.read_committed.store(wc, Ordering::Release);
                    return Err(self.fatal(format!("malformed frame at cursor {} during clear", cursor)));
                }
            }
        }

        header.read_committed.store(wc, Ordering::Release);
        header.nremq.fetch_add(frames, Ordering::AcqRel);
        info!("cleared {} frames from ring {}", frames, self.name);
        Ok(frames)
    }

    /// Detach from the channel; the owner also unlinks it
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.header().nattached.fetch_sub(1, Ordering::AcqRel);
        if self.segment.is_owner() {
            self.segment.unlink()?;
        }
        debug!("closed ring {}", self.name);
        Ok(())
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        if !self.closed {
            self.header().nattached.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
