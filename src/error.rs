//! Error types and handling for eventring

/// Result type alias for eventring operations
pub type Result<T> = std::result::Result<T, EventRingError>;

/// Error taxonomy for ring buffers, event messages and transports
#[derive(Debug, thiserror::Error)]
pub enum EventRingError {
    /// I/O related errors (file operations, sockets, mmap)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A shared memory segment, socket or file could not be acquired
    #[error("Resource error: {message}")]
    Resource { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Not enough free words in the ring (retryable)
    #[error("Buffer full: {channel} (requested {requested} words, free {free})")]
    BufferFull {
        channel: String,
        requested: usize,
        free: usize,
    },

    /// No complete frame in the ring (retryable)
    #[error("Buffer empty: {channel}")]
    BufferEmpty { channel: String },

    /// A record set could not be turned into an event message
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// An event message could not be parsed
    #[error("Decoding error: {message}")]
    Decoding { message: String },

    /// Checksum trailer did not match the message body
    #[error("Integrity error: expected checksum {expected:#010x}, computed {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },

    /// A sequential file ended in the middle of a frame that is not the last one
    #[error("Corrupt stream at byte offset {offset}: {message}")]
    CorruptStream { offset: u64, message: String },

    /// Impossible shared header state; the channel is unusable
    #[error("Channel corruption in {channel}: {message}")]
    Corruption { channel: String, message: String },

    /// Peer could not be reached or went away
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A bounded wait expired
    #[error("Timed out after {elapsed_ms} ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Shutdown was requested while waiting
    #[error("Shutdown requested")]
    Shutdown,

    /// A transport entered the faulted state
    #[error("Channel {channel} faulted after event {last_event:?}: {message}")]
    Faulted {
        channel: String,
        last_event: Option<u64>,
        message: String,
        #[source]
        cause: Option<Box<EventRingError>>,
    },
}

impl EventRingError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a resource error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a buffer full error
    pub fn buffer_full(channel: impl Into<String>, requested: usize, free: usize) -> Self {
        Self::BufferFull {
            channel: channel.into(),
            requested,
            free,
        }
    }

    /// Create a buffer empty error
    pub fn buffer_empty(channel: impl Into<String>) -> Self {
        Self::BufferEmpty {
            channel: channel.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create a decoding error
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding {
            message: message.into(),
        }
    }

    /// Create an integrity error
    pub fn integrity(expected: u32, actual: u32) -> Self {
        Self::Integrity { expected, actual }
    }

    /// Create a corrupt stream error
    pub fn corrupt_stream(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptStream {
            offset,
            message: message.into(),
        }
    }

    /// Create a channel corruption error
    pub fn corruption(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create a faulted-channel error
    pub fn faulted(
        channel: impl Into<String>,
        last_event: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self::Faulted {
            channel: channel.into(),
            last_event,
            message: message.into(),
            cause: None,
        }
    }

    /// Create a faulted-channel error keeping the error that caused it
    pub fn faulted_by(channel: impl Into<String>, last_event: Option<u64>, cause: EventRingError) -> Self {
        Self::Faulted {
            channel: channel.into(),
            last_event,
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The error that drove a channel into the faulted state
    pub fn fault_cause(&self) -> Option<&EventRingError> {
        match self {
            Self::Faulted { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Full/empty conditions are expected and must be retried, never propagated
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BufferFull { .. } | Self::BufferEmpty { .. })
    }

    /// Errors caused by a single malformed message
    pub fn is_malformed_data(&self) -> bool {
        matches!(
            self,
            Self::Decoding { .. } | Self::Integrity { .. } | Self::CorruptStream { .. }
        )
    }
}

impl From<std::io::Error> for EventRingError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for EventRingError {
    fn from(err: bincode::Error) -> Self {
        Self::encoding(format!("Bincode error: {}", err))
    }
}

impl From<toml::de::Error> for EventRingError {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_parameter("config", err.to_string())
    }
}
