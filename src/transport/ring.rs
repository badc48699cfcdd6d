//! Ring buffer endpoints

use std::sync::Arc;

use log::warn;

use crate::{
    config::DEFAULT_RED_ZONE,
    error::{EventRingError, Result},
    ring::RingBuffer,
};

use super::endpoint::{MessageSink, MessageSource};

/// Inserts messages into a shared ring
#[derive(Debug)]
pub struct RingSink {
    ring: Arc<RingBuffer>,
    red_zone: f64,
    congested: bool,
    open: bool,
}

impl RingSink {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self {
            ring,
            red_zone: DEFAULT_RED_ZONE,
            congested: false,
            open: false,
        }
    }

    /// Occupancy fraction above which the sink reports congestion
    pub fn with_red_zone(mut self, fraction: f64) -> Self {
        self.red_zone = fraction;
        self
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Whether the ring was above its red zone at the last send
    pub fn is_congested(&self) -> bool {
        self.congested
    }
}

impl MessageSink for RingSink {
    fn channel(&self) -> &str {
        self.ring.name()
    }

    fn open(&mut self) -> Result<()> {
        self.ring.check_header()?;
        self.open = true;
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        if !self.open {
            return Err(EventRingError::connection(format!(
                "Ring sink {} is not open",
                self.ring.name()
            )));
        }
        // too large for this ring: reject the message, keep the channel
        if message.len() > self.ring.max_payload_bytes() {
            return Err(EventRingError::encoding(format!(
                "Message of {} bytes exceeds the {} byte frame limit of ring {}",
                message.len(),
                self.ring.max_payload_bytes(),
                self.ring.name()
            )));
        }
        self.ring.insert_bytes(message)?;

        let congested = self.ring.is_above_red_zone(self.red_zone);
        if congested && !self.congested {
            warn!(
                "ring {} above red zone ({} of {} words used)",
                self.ring.name(),
                self.ring.used_words(),
                self.ring.capacity_words()
            );
        }
        self.congested = congested;
        Ok(())
    }

    fn peer_alive(&self) -> bool {
        self.ring.is_owner() || self.ring.is_owner_alive()
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Removes messages from a shared ring
#[derive(Debug)]
pub struct RingSource {
    ring: Arc<RingBuffer>,
    open: bool,
}

impl RingSource {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self { ring, open: false }
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }
}

impl MessageSource for RingSource {
    fn channel(&self) -> &str {
        self.ring.name()
    }

    fn open(&mut self) -> Result<()> {
        self.ring.check_header()?;
        self.open = true;
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.open {
            return Err(EventRingError::connection(format!(
                "Ring source {} is not open",
                self.ring.name()
            )));
        }
        self.ring.remove_bytes().map(Some)
    }

    fn peer_alive(&self) -> bool {
        self.ring.is_owner() || self.ring.is_owner_alive()
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
