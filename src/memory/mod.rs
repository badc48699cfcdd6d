//! Named shared memory segments backing ring buffer channels

pub mod config;
pub mod segment;

pub use config::{default_segment_dir, SegmentConfig};
pub use segment::{SegmentRole, SharedSegment};
