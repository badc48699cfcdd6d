//! TCP endpoints
//!
//! The wire format is the bare event message: its header starts with the
//! total message length, so no extra framing is added.

use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_MAX_MESSAGE_SIZE,
    error::{EventRingError, Result},
    message::HEADER_LEN,
};

use super::endpoint::{MessageSink, MessageSource};

/// TCP transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bound on a single connect attempt
    #[serde(with = "crate::config::millis")]
    pub connect_timeout: Duration,
    /// How long a receive blocks before reporting "nothing yet"
    #[serde(with = "crate::config::millis")]
    pub poll_interval: Duration,
    /// Bound on writing one message
    #[serde(with = "crate::config::millis")]
    pub write_timeout: Duration,
    /// Largest message accepted from the wire
    pub max_message_size: usize,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            write_timeout: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            nodelay: true,
        }
    }
}

impl TcpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("poll_interval", self.poll_interval),
            ("write_timeout", self.write_timeout),
        ] {
            if value.is_zero() {
                return Err(EventRingError::invalid_parameter(
                    name,
                    "Duration must be greater than 0",
                ));
            }
        }
        if self.max_message_size < HEADER_LEN {
            return Err(EventRingError::invalid_parameter(
                "max_message_size",
                format!("Must be at least {} bytes", HEADER_LEN),
            ));
        }
        Ok(())
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| {
            EventRingError::invalid_parameter("address", format!("Cannot resolve {}: {}", address, e))
        })?
        .next()
        .ok_or_else(|| {
            EventRingError::invalid_parameter("address", format!("{} resolves to nothing", address))
        })
}

/// Sends messages to a remote receiver; connects lazily on first send
#[derive(Debug)]
pub struct TcpSink {
    address: String,
    config: TcpConfig,
    remote: Option<SocketAddr>,
    stream: Option<TcpStream>,
    bytes_sent: u64,
}

impl TcpSink {
    pub fn new(address: impl Into<String>, config: TcpConfig) -> Self {
        Self {
            address: address.into(),
            config,
            remote: None,
            stream: None,
            bytes_sent: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn ensure_connected(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let remote = match self.remote {
                Some(remote) => remote,
                None => {
                    return Err(EventRingError::connection(format!(
                        "TCP sink {} is not open",
                        self.address
                    )))
                }
            };
            let stream = TcpStream::connect_timeout(&remote, self.config.connect_timeout)
                .map_err(|e| {
                    EventRingError::connection(format!("Failed to connect to {}: {}", remote, e))
                })?;
            stream
                .set_write_timeout(Some(self.config.write_timeout))
                .and_then(|_| stream.set_nodelay(self.config.nodelay))
                .map_err(|e| EventRingError::from_io(e, "Failed to configure TCP stream"))?;
            info!("connected to {}", remote);
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| EventRingError::connection("TCP stream missing"))
    }
}

impl MessageSink for TcpSink {
    fn channel(&self) -> &str {
        &self.address
    }

    fn open(&mut self) -> Result<()> {
        self.config.validate()?;
        self.remote = Some(resolve(&self.address)?);
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        if message.len() > self.config.max_message_size {
            return Err(EventRingError::encoding(format!(
                "Message of {} bytes exceeds the TCP limit of {} bytes",
                message.len(),
                self.config.max_message_size
            )));
        }
        let stream = self.ensure_connected()?;
        if let Err(e) = stream.write_all(message).and_then(|_| stream.flush()) {
            self.stream = None;
            return Err(EventRingError::connection(format!(
                "Failed to send to {}: {}",
                self.address, e
            )));
        }
        self.bytes_sent += message.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("closed connection to {} after {} bytes", self.address, self.bytes_sent);
        }
        Ok(())
    }
}

/// Accepts one sender and receives its messages
#[derive(Debug)]
pub struct TcpSource {
    address: String,
    config: TcpConfig,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    /// Bytes of a message still being received
    pending: Vec<u8>,
}

impl TcpSource {
    pub fn new(address: impl Into<String>, config: TcpConfig) -> Self {
        Self {
            address: address.into(),
            config,
            listener: None,
            stream: None,
            pending: Vec::new(),
        }
    }

    /// Create a source and bind its listener right away
    pub fn bind(address: impl Into<String>, config: TcpConfig) -> Result<Self> {
        let mut source = Self::new(address, config);
        source.open()?;
        Ok(source)
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn accept(&mut self) -> Result<bool> {
        let accepted = match &self.listener {
            Some(listener) => listener.accept(),
            None => {
                return Err(EventRingError::connection(format!(
                    "TCP source {} is not open",
                    self.address
                )))
            }
        };
        match accepted {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_read_timeout(Some(self.config.poll_interval)))
                    .and_then(|_| stream.set_nodelay(self.config.nodelay))
                    .map_err(|e| EventRingError::from_io(e, "Failed to configure TCP stream"))?;
                info!("accepted sender {} on {}", peer, self.address);
                self.stream = Some(stream);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(EventRingError::connection(format!(
                "Failed to accept on {}: {}",
                self.address, e
            ))),
        }
    }

    /// Bytes still needed to complete the pending message
    fn missing(&self) -> Result<usize> {
        if self.pending.len() < 4 {
            return Ok(4 - self.pending.len());
        }
        let p = &self.pending;
        let total = u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize;
        if total < HEADER_LEN || total > self.config.max_message_size {
            return Err(EventRingError::connection(format!(
                "Implausible message length {} from {}",
                total, self.address
            )));
        }
        Ok(total - self.pending.len())
    }
}

impl MessageSource for TcpSource {
    fn channel(&self) -> &str {
        &self.address
    }

    fn open(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let listener = TcpListener::bind(&self.address).map_err(|e| {
            EventRingError::resource(format!("Failed to bind {}: {}", self.address, e))
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| EventRingError::from_io(e, "Failed to configure listener"))?;
        info!("listening on {}", listener.local_addr().map_err(EventRingError::from)?);
        self.listener = Some(listener);
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if self.stream.is_none() && !self.accept()? {
            return Err(EventRingError::buffer_empty(&self.address));
        }

        let mut chunk = [0u8; 64 * 1024];
        loop {
            let missing = self.missing()?;
            if missing == 0 {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(EventRingError::connection("TCP stream missing")),
            };
            let want = missing.min(chunk.len());
            match stream.read(&mut chunk[..want]) {
                Ok(0) => {
                    self.stream = None;
                    if self.pending.is_empty() {
                        debug!("sender on {} closed the connection", self.address);
                        return Ok(None);
                    }
                    let received = self.pending.len();
                    self.pending.clear();
                    return Err(EventRingError::connection(format!(
                        "Sender on {} closed the connection mid-message ({} bytes received)",
                        self.address, received
                    )));
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(EventRingError::buffer_empty(&self.address));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stream = None;
                    warn!("connection on {} failed: {}", self.address, e);
                    return Err(EventRingError::connection(format!(
                        "Failed to receive on {}: {}",
                        self.address, e
                    )));
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.listener = None;
        self.pending.clear();
        Ok(())
    }
}
