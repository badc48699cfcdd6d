//! Self-describing event messages
//!
//! An event message is a fixed header followed by the event's records, each
//! framed as (name length, flags, name, type tag, payload length, payload), and
//! an optional checksum trailer. The record section may be LZ4 compressed.
//! The same bytes travel through rings, sockets and sequential files.

pub mod checksum;
pub mod codec;
pub mod compression;
pub mod handler;
pub mod header;
pub mod record;


pub use checksum::ChecksumKind;
pub use codec::{RecordCodec, SerdeCodec, TypeRegistry};
pub use compression::Compression;
pub use handler::{DecodedEvent, EventMessage, HandlerConfig, MessageHandler};
pub use header::{EventHeader, EventId, EventMeta, MessageType, HEADER_LEN, MESSAGE_MAGIC, MESSAGE_VERSION};
pub use record::{Record, RecordFlags, RecordSet};
