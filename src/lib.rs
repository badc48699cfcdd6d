//! # eventring - Event Streaming over Shared-Memory Rings
//!
//! eventring moves serialized detector events between independent OS
//! processes of a data-acquisition pipeline with bounded memory, explicit
//! backpressure and defined failure behaviour.
//!
//! ## Features
//!
//! - **Shared-memory ring buffers**: multi-producer/multi-consumer word rings in
//!   named segments, with in-order commit and stale-owner detection
//! - **Event messages**: self-describing records with a versioned header and an
//!   optional CRC-32 or XOR trailer
//! - **Sequential files**: length-prefixed spooling with frame indexing for
//!   parallel playback
//! - **Tx/Rx transports**: one state machine over rings, TCP sockets and files
//! - **Pipeline stages**: producer/consumer drivers with cooperative shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   Tx    ┌──────────────────────┐   Rx    ┌──────────────┐
//! │ EventSource  │ ──────▶ │ RingBuffer / TCP /   │ ──────▶ │ EventConsumer│
//! │ (producer)   │         │ SeqFile              │         │ (consumer)   │
//! └──────────────┘         └──────────────────────┘         └──────────────┘
//!        │                                                          │
//!        ▼                                                          ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ MessageHandler: RecordSet <-> EventMessage (header, records, checksum)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod ring;
pub mod seqfile;

// Streaming
pub mod pipeline;
pub mod transport;

// Main API re-exports
pub use error::{EventRingError, Result};
pub use memory::{SegmentConfig, SegmentRole, SharedSegment};
pub use message::{
    ChecksumKind, Compression, DecodedEvent, EventHeader, EventId, EventMessage, EventMeta, HandlerConfig,
    MessageHandler, MessageType, Record, RecordCodec, RecordFlags, RecordSet, SerdeCodec,
    TypeRegistry,
};
pub use pipeline::{
    ConsumerStage, Driver, DriverReport, EventConsumer, EventSource, PipelineConfig,
    PipelineStage, ProducerStage, RingMode, ShutdownSignal, SourceEvent, Stage, StreamContext,
};
pub use ring::{RingBuffer, RingConfig, RingStats, RingStatus};
pub use seqfile::{FrameIndex, SeqFileReader, SeqFileWriter};
pub use transport::{
    FileSink, FileSource, MessageSink, MessageSource, RetryPolicy, RingSink, RingSource, Rx,
    TcpConfig, TcpSink, TcpSource, TransportState, Tx,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
