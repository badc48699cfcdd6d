//! Transport lifecycle

use std::fmt;

/// Lifecycle of a Tx or Rx endpoint.
///
/// `Idle -> Connected -> Streaming -> {Draining, Faulted} -> Closed`; a
/// transport may also fault or close before it starts streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Not yet attached or connected
    Idle,
    /// Endpoint acquired, nothing transferred yet
    Connected,
    /// At least one message transferred
    Streaming,
    /// End-of-stream marker sent or received
    Draining,
    /// Unrecoverable error; resources have been released
    Faulted,
    /// Resources released
    Closed,
}

impl TransportState {
    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        match (self, next) {
            (Idle, Connected) => true,
            (Connected, Streaming) | (Connected, Draining) => true,
            (Streaming, Streaming) | (Streaming, Draining) => true,
            (Idle | Connected | Streaming | Draining, Faulted) => true,
            (Faulted | Closed, Faulted) => false,
            (Closed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }

    /// Whether messages may still be transferred
    pub fn is_active(self) -> bool {
        matches!(self, TransportState::Connected | TransportState::Streaming)
    }

    /// Whether the transport has finished, cleanly or not
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransportState::Draining | TransportState::Faulted | TransportState::Closed
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connected => "connected",
            TransportState::Streaming => "streaming",
            TransportState::Draining => "draining",
            TransportState::Faulted => "faulted",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}
