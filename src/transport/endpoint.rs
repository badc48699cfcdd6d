//! Sink and source abstractions shared by every transport medium

use crate::error::Result;

/// Where a Tx delivers encoded messages
pub trait MessageSink: Send {
    /// Name used in logs and fault reports
    fn channel(&self) -> &str;

    /// Acquire the endpoint (attach, bind, create the file)
    fn open(&mut self) -> Result<()>;

    /// Deliver one message.
    ///
    /// `BufferFull` means "retry later". A `Connection` error before anything
    /// was delivered means the peer is not reachable yet.
    fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Make delivered messages durable or visible to the peer
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether the process on the other side can still make progress
    fn peer_alive(&self) -> bool {
        true
    }

    /// Release the endpoint; must be idempotent
    fn close(&mut self) -> Result<()>;
}

/// Where an Rx takes encoded messages from
pub trait MessageSource: Send {
    /// Name used in logs and fault reports
    fn channel(&self) -> &str;

    /// Acquire the endpoint
    fn open(&mut self) -> Result<()>;

    /// Take the next message.
    ///
    /// `Ok(None)` means the medium ended (file end, peer closed the socket);
    /// `BufferEmpty` means "retry later".
    fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Whether the process on the other side can still make progress
    fn peer_alive(&self) -> bool {
        true
    }

    /// Release the endpoint; must be idempotent
    fn close(&mut self) -> Result<()>;
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn channel(&self) -> &str {
        (**self).channel()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn peer_alive(&self) -> bool {
        (**self).peer_alive()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    fn channel(&self) -> &str {
        (**self).channel()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).recv()
    }

    fn peer_alive(&self) -> bool {
        (**self).peer_alive()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
