//! Sending side of a transport pair

use log::{debug, error, info, warn};

use crate::{
    error::{EventRingError, Result},
    message::{EventId, EventMeta, MessageHandler, MessageType, RecordSet},
    pipeline::ShutdownSignal,
};

use super::{endpoint::MessageSink, retry::RetryPolicy, state::TransportState};

/// Serializes record sets and pushes them into a sink
pub struct Tx<S: MessageSink> {
    sink: S,
    handler: MessageHandler,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
    state: TransportState,
    source_id: u32,
    sequence: u64,
    last_event: Option<u64>,
    sent: u64,
}

impl<S: MessageSink> std::fmt::Debug for Tx<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("channel", &self.sink.channel())
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("last_event", &self.last_event)
            .finish()
    }
}

impl<S: MessageSink> Tx<S> {
    pub fn new(sink: S, handler: MessageHandler, retry: RetryPolicy, shutdown: ShutdownSignal) -> Self {
        Self {
            sink,
            handler,
            retry,
            shutdown,
            state: TransportState::Idle,
            source_id: std::process::id(),
            sequence: 0,
            last_event: None,
            sent: 0,
        }
    }

    /// Identify this producer in every message header
    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn channel(&self) -> &str {
        self.sink.channel()
    }

    /// Event number of the last message delivered
    pub fn last_event(&self) -> Option<u64> {
        self.last_event
    }

    /// Messages delivered, markers included
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Acquire the sink: `Idle -> Connected`
    pub fn connect(&mut self) -> Result<()> {
        if self.state != TransportState::Idle {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot connect a transport that is {}", self.state),
            ));
        }
        self.sink.open()?;
        self.transition(TransportState::Connected);
        Ok(())
    }

    /// Send one event's records
    pub fn send_event(&mut self, id: EventId, records: &RecordSet) -> Result<()> {
        self.send(EventMeta::event(id), records)
    }

    /// Send a run boundary marker
    pub fn send_run_marker(&mut self, msg_type: MessageType, id: EventId) -> Result<()> {
        self.send(EventMeta::event(id).with_type(msg_type), &RecordSet::new())
    }

    fn send(&mut self, meta: EventMeta, records: &RecordSet) -> Result<()> {
        if !self.state.is_active() {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot send on a transport that is {}", self.state),
            ));
        }

        let meta = meta.with_source(self.source_id, self.sequence);
        let message = self.handler.serialize(meta, records)?;
        self.deliver(message.as_bytes())?;

        self.sequence += 1;
        self.sent += 1;
        if meta.msg_type != MessageType::Terminate {
            self.last_event = Some(meta.id.event);
        }
        if self.state == TransportState::Connected {
            self.transition(TransportState::Streaming);
        }
        debug!(
            "sent {:?} {} ({} bytes) on {}",
            meta.msg_type,
            meta.id,
            message.len(),
            self.sink.channel()
        );
        Ok(())
    }

    /// Push bytes into the sink, retrying while it is full
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        let operation = format!("send to {}", self.sink.channel());
        let mut backoff = self.retry.start(&self.shutdown);
        let mut last_connection_error = None;

        loop {
            let retry_reason = match self.sink.send(bytes) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => e,
                // the peer may simply not be listening yet
                Err(e @ EventRingError::Connection { .. })
                    if self.state == TransportState::Connected =>
                {
                    debug!("{}: {}", operation, e);
                    e
                }
                Err(e @ EventRingError::Encoding { .. }) => return Err(e),
                Err(e) => return Err(self.fault(e)),
            };

            if !self.sink.peer_alive() {
                return Err(self.fault(EventRingError::connection(format!(
                    "peer of {} is gone",
                    self.sink.channel()
                ))));
            }
            if matches!(retry_reason, EventRingError::Connection { .. }) {
                last_connection_error = Some(retry_reason);
            }

            match backoff.wait(&operation) {
                Ok(()) => {}
                Err(EventRingError::Shutdown) => return Err(EventRingError::Shutdown),
                Err(timeout) => {
                    return match last_connection_error {
                        // never got through: a startup failure, not a channel fault
                        Some(e) if self.state == TransportState::Connected => {
                            warn!(
                                "{} gave up after {} attempts: {}",
                                operation,
                                backoff.attempts(),
                                e
                            );
                            Err(e)
                        }
                        _ => Err(self.fault(timeout)),
                    };
                }
            }
        }
    }

    /// Send the end-of-stream marker, flush and close: `-> Draining -> Closed`
    pub fn finish(&mut self) -> Result<()> {
        self.send(EventMeta::terminate(), &RecordSet::new())?;
        self.transition(TransportState::Draining);
        if let Err(e) = self.sink.flush() {
            return Err(self.fault(e));
        }
        self.close()
    }

    /// Release the sink; safe to call on every exit path
    pub fn close(&mut self) -> Result<()> {
        if self.state == TransportState::Closed {
            return Ok(());
        }
        let result = self.sink.close();
        self.transition(TransportState::Closed);
        result
    }

    fn fault(&mut self, cause: EventRingError) -> EventRingError {
        let channel = self.sink.channel().to_string();
        error!(
            "tx {} faulted after event {:?}: {}",
            channel, self.last_event, cause
        );
        if let Err(e) = self.sink.close() {
            warn!("failed to release {}: {}", channel, e);
        }
        self.transition(TransportState::Faulted);
        EventRingError::faulted_by(channel, self.last_event, cause)
    }

    fn transition(&mut self, next: TransportState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!("tx {}: {} -> {}", self.sink.channel(), self.state, next);
        self.state = next;
    }
}

impl<S: MessageSink> Drop for Tx<S> {
    fn drop(&mut self) {
        if self.state != TransportState::Closed {
            if let Err(e) = self.close() {
                warn!("failed to close tx {}: {}", self.sink.channel(), e);
            }
        }
    }
}
