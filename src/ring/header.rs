//! Shared ring header placed at the start of the segment

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{EventRingError, Result};

/// Magic number for header validation ("EVTRING1")
pub const RING_MAGIC: u64 = 0x4556_5452_494E_4731;

/// Current header layout version
pub const RING_VERSION: u32 = 1;

/// Size of the header in bytes (two cache lines)
pub const HEADER_SIZE: usize = 128;

/// Words preceding every payload: word count, byte length
pub const FRAME_OVERHEAD_WORDS: usize = 2;

/// Value of a length word marking the unused tail before a wrap
pub const PAD_MARKER: u32 = u32::MAX;

/// Header shared by every process attached to a channel.
///
/// Cursors are monotonically increasing word counts; the slot of cursor `c` is
/// `c % capacity_words`. Writers reserve with `write_reserved` and publish with
/// `write_committed`; readers do the same with the read pair. Invariant:
/// `read_committed <= read_reserved <= write_committed <= write_reserved` and
/// `write_reserved - read_committed <= capacity_words`.
///
/// Layout (128 bytes):
/// - magic: u64, written last by the creator
/// - version: u32, owner_pid: u32
/// - capacity_words: u64
/// - write_reserved, write_committed, read_reserved, read_committed: u64 each
/// - ninsq, nremq: u64 each
/// - nattached: u32, _reserved: u32
/// - _padding: [u8; 48]
#[repr(C)]
pub struct RingHeader {
    pub magic: AtomicU64,
    pub version: u32,
    pub owner_pid: u32,
    pub capacity_words: u64,
    pub write_reserved: AtomicU64,
    pub write_committed: AtomicU64,
    pub read_reserved: AtomicU64,
    pub read_committed: AtomicU64,
    /// Frames inserted by all processes
    pub ninsq: AtomicU64,
    /// Frames removed by all processes
    pub nremq: AtomicU64,
    /// Processes currently attached, owner included
    pub nattached: AtomicU32,
    _reserved: u32,
    _padding: [u8; 48],
}

const _: () = assert!(
    std::mem::size_of::<RingHeader>() == HEADER_SIZE,
    "RingHeader size must equal HEADER_SIZE"
);

impl RingHeader {
    /// Initialise a zeroed header in place. The magic is published last.
    ///
    /// # Safety
    /// `ptr` must point to `HEADER_SIZE` writable bytes that no other process
    /// reads as an initialised header yet.
    pub unsafe fn initialize(ptr: *mut RingHeader, capacity_words: u64) {
        (*ptr).version = RING_VERSION;
        (*ptr).owner_pid = std::process::id();
        (*ptr).capacity_words = capacity_words;
        (*ptr).write_reserved.store(0, Ordering::Relaxed);
        (*ptr).write_committed.store(0, Ordering::Relaxed);
        (*ptr).read_reserved.store(0, Ordering::Relaxed);
        (*ptr).read_committed.store(0, Ordering::Relaxed);
        (*ptr).ninsq.store(0, Ordering::Relaxed);
        (*ptr).nremq.store(0, Ordering::Relaxed);
        (*ptr).nattached.store(1, Ordering::Relaxed);
        (*ptr)._reserved = 0;
        (*ptr)._padding.fill(0);
        (*ptr).magic.store(RING_MAGIC, Ordering::Release);
    }

    /// Whether the creator has finished initialising the header
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == RING_MAGIC
    }

    /// Validate version and capacity against what the attacher expects
    pub fn validate(&self, channel: &str, capacity_words: u64) -> Result<()> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != RING_MAGIC {
            return Err(EventRingError::corruption(
                channel,
                format!(
                    "Invalid ring magic: expected {:#018x}, got {:#018x}",
                    RING_MAGIC, magic
                ),
            ));
        }

        if self.version != RING_VERSION {
            return Err(EventRingError::corruption(
                channel,
                format!("Unsupported ring version {}", self.version),
            ));
        }

        if self.capacity_words != capacity_words {
            return Err(EventRingError::invalid_parameter(
                "capacity_words",
                format!(
                    "Channel {} has capacity {} words but {} were requested",
                    channel, self.capacity_words, capacity_words
                ),
            ));
        }

        self.check_cursors(channel)
    }

    /// Check the cursor ordering invariant on a quiescent snapshot.
    ///
    /// Loads go from the most lagging cursor to the most advanced one so that
    /// concurrent progress can never make a healthy ring look inverted.
    pub fn check_cursors(&self, channel: &str) -> Result<()> {
        let rc = self.read_committed.load(Ordering::Acquire);
        let rr = self.read_reserved.load(Ordering::Acquire);
        let wc = self.write_committed.load(Ordering::Acquire);
        let wr = self.write_reserved.load(Ordering::Acquire);

        if rc > rr || rr > wc || wc > wr {
            return Err(EventRingError::corruption(
                channel,
                format!(
                    "Impossible cursor state: read {}/{} write {}/{}",
                    rc, rr, wc, wr
                ),
            ));
        }
        Ok(())
    }
}
