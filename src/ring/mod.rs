//! Multi-process ring buffer of 32-bit words living in a shared segment
//!
//! Frames are self-delimiting: a two-word prefix (payload word count, payload
//! byte length) followed by the payload. A frame never straddles the end of the
//! data region; when it would, the writer stamps a pad marker and the frame
//! starts again at word 0.

pub mod buffer;
pub mod config;
pub mod header;
pub mod stats;


pub use buffer::RingBuffer;
pub use config::RingConfig;
pub use header::{FRAME_OVERHEAD_WORDS, HEADER_SIZE, PAD_MARKER, RING_MAGIC, RING_VERSION};
pub use stats::{RingStats, RingStatus};
