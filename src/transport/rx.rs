//! Receiving side of a transport pair

use log::{debug, error, info, warn};

use crate::{
    error::{EventRingError, Result},
    message::{DecodedEvent, MessageHandler},
    pipeline::ShutdownSignal,
};

use super::{endpoint::MessageSource, retry::RetryPolicy, state::TransportState};

/// Takes messages from a source and deserializes them
pub struct Rx<S: MessageSource> {
    source: S,
    handler: MessageHandler,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
    state: TransportState,
    last_event: Option<u64>,
    received: u64,
}

impl<S: MessageSource> std::fmt::Debug for Rx<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rx")
            .field("channel", &self.source.channel())
            .field("state", &self.state)
            .field("last_event", &self.last_event)
            .finish()
    }
}

impl<S: MessageSource> Rx<S> {
    pub fn new(
        source: S,
        handler: MessageHandler,
        retry: RetryPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source,
            handler,
            retry,
            shutdown,
            state: TransportState::Idle,
            last_event: None,
            received: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn channel(&self) -> &str {
        self.source.channel()
    }

    /// Event number of the last message received
    pub fn last_event(&self) -> Option<u64> {
        self.last_event
    }

    /// Messages received, markers included
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Acquire the source: `Idle -> Connected`
    pub fn connect(&mut self) -> Result<()> {
        if self.state != TransportState::Idle {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot connect a transport that is {}", self.state),
            ));
        }
        self.source.open()?;
        self.transition(TransportState::Connected);
        Ok(())
    }

    /// Wait for the next event.
    ///
    /// `Ok(None)` is the end of the stream: a terminate marker arrived or the
    /// medium ended. The transport is then `Draining`.
    pub fn recv_event(&mut self) -> Result<Option<DecodedEvent>> {
        if self.state == TransportState::Draining {
            return Ok(None);
        }
        if !self.state.is_active() {
            return Err(EventRingError::invalid_parameter(
                "state",
                format!("Cannot receive on a transport that is {}", self.state),
            ));
        }

        let bytes = match self.wait_for_message()? {
            Some(bytes) => bytes,
            None => {
                info!("rx {}: medium ended without a terminate marker", self.source.channel());
                self.transition(TransportState::Draining);
                return Ok(None);
            }
        };

        let event = match self.handler.deserialize(&bytes) {
            Ok(event) => event,
            Err(e) => return Err(self.fault(e)),
        };

        self.received += 1;
        if self.state == TransportState::Connected {
            self.transition(TransportState::Streaming);
        }
        if event.header.is_terminate() {
            debug!(
                "rx {}: terminate from source {}",
                self.source.channel(),
                event.header.source_id
            );
            self.transition(TransportState::Draining);
            return Ok(None);
        }

        self.last_event = Some(event.header.id.event);
        debug!(
            "received {:?} {} ({} records) on {}",
            event.header.msg_type,
            event.header.id,
            event.records.len(),
            self.source.channel()
        );
        Ok(Some(event))
    }

    fn wait_for_message(&mut self) -> Result<Option<Vec<u8>>> {
        let operation = format!("receive from {}", self.source.channel());
        let mut backoff = self.retry.start(&self.shutdown);

        loop {
            match self.source.recv() {
                Ok(message) => return Ok(message),
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(self.fault(e)),
            }

            if !self.source.peer_alive() {
                return Err(self.fault(EventRingError::connection(format!(
                    "peer of {} is gone",
                    self.source.channel()
                ))));
            }

            match backoff.wait(&operation) {
                Ok(()) => {}
                Err(EventRingError::Shutdown) => return Err(EventRingError::Shutdown),
                Err(timeout) => return Err(self.fault(timeout)),
            }
        }
    }

    /// Release the source; safe to call on every exit path
    pub fn close(&mut self) -> Result<()> {
        if self.state == TransportState::Closed {
            return Ok(());
        }
        let result = self.source.close();
        self.transition(TransportState::Closed);
        result
    }

    fn fault(&mut self, cause: EventRingError) -> EventRingError {
        let channel = self.source.channel().to_string();
        error!(
            "rx {} faulted after event {:?}: {}",
            channel, self.last_event, cause
        );
        if let Err(e) = self.source.close() {
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
        info!("rx {}: {} -> {}", self.source.channel(), self.state, next);
        self.state = next;
    }
}

impl<S: MessageSource> Drop for Rx<S> {
    fn drop(&mut self) {
        if self.state != TransportState::Closed {
            if let Err(e) = self.close() {
                warn!("failed to close rx {}: {}", self.source.channel(), e);
            }
        }
    }
}
