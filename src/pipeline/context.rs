//! Per-process streaming context
//!
//! Holds the configuration, the ring handles this process has opened and the
//! shutdown signal, and builds Tx/Rx pairs from them. One context is created
//! by `main` and passed to whatever needs a channel.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, info, warn};

use crate::{
    error::{EventRingError, Result},
    message::MessageHandler,
    ring::{RingBuffer, RingConfig},
    transport::{
        FileSink, FileSource, MessageSink, MessageSource, RingSink, RingSource, Rx, TcpSink,
        TcpSource, Tx,
    },
};

use super::{config::PipelineConfig, shutdown::ShutdownSignal};

/// How a ring handle is acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingMode {
    /// Create the channel and own it
    Create,
    /// Attach to a channel another process owns
    Attach,
    /// Attach if the channel exists, otherwise create it
    Open,
}

/// Explicit replacement for a process-wide streamer singleton
#[derive(Debug)]
pub struct StreamContext {
    config: PipelineConfig,
    shutdown: ShutdownSignal,
    rings: RwLock<HashMap<String, Arc<RingBuffer>>>,
}

impl StreamContext {
    pub fn new(config: PipelineConfig, shutdown: ShutdownSignal) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown,
            rings: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    fn read_rings(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Arc<RingBuffer>>>> {
        self.rings
            .read()
            .map_err(|_| EventRingError::resource("Ring registry lock poisoned"))
    }

    fn write_rings(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Arc<RingBuffer>>>> {
        self.rings
            .write()
            .map_err(|_| EventRingError::resource("Ring registry lock poisoned"))
    }

    /// Configuration of a ring channel known to this context
    pub fn ring_config(&self, name: &str) -> Result<&RingConfig> {
        self.config.ring(name).ok_or_else(|| {
            EventRingError::invalid_parameter("ring", format!("No ring named {} is configured", name))
        })
    }

    /// Return the handle for `name`, acquiring it on first use
    pub fn open_ring(&self, name: &str, mode: RingMode) -> Result<Arc<RingBuffer>> {
        if let Some(ring) = self.read_rings()?.get(name) {
            return Ok(Arc::clone(ring));
        }

        let config = self.ring_config(name)?.clone();
        let mut rings = self.write_rings()?;
        // another thread may have opened it while the lock was released
        if let Some(ring) = rings.get(name) {
            return Ok(Arc::clone(ring));
        }

        let ring = Arc::new(match mode {
            RingMode::Create => RingBuffer::create(config)?,
            RingMode::Attach => RingBuffer::attach(config)?,
            RingMode::Open => RingBuffer::open(config)?,
        });
        debug!("context registered ring {} ({:?})", name, mode);
        rings.insert(name.to_string(), Arc::clone(&ring));
        Ok(ring)
    }

    /// Handle already opened for `name`
    pub fn ring(&self, name: &str) -> Option<Arc<RingBuffer>> {
        self.read_rings().ok()?.get(name).cloned()
    }

    pub fn ring_names(&self) -> Vec<String> {
        match self.read_rings() {
            Ok(rings) => {
                let mut names: Vec<String> = rings.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Drop this context's handle for `name`. The ring is closed (and unlinked,
    /// if owned) once no Tx/Rx still holds it.
    pub fn release_ring(&self, name: &str) -> Result<()> {
        let ring = self.write_rings()?.remove(name).ok_or_else(|| {
            EventRingError::invalid_parameter("ring", format!("Ring {} is not open", name))
        })?;
        match Arc::try_unwrap(ring) {
            Ok(ring) => ring.close(),
            Err(_) => {
                warn!("ring {} still in use; it will be detached by its last user", name);
                Ok(())
            }
        }
    }

    /// A message handler built from the context's handler settings
    pub fn handler(&self) -> Result<MessageHandler> {
        MessageHandler::new(self.config.handler.clone())
    }

    /// Wrap any sink into a Tx sharing this context's settings
    pub fn tx<S: MessageSink>(&self, sink: S) -> Result<Tx<S>> {
        let tx = Tx::new(
            sink,
            self.handler()?,
            self.config.retry.clone(),
            self.shutdown.clone(),
        );
        Ok(match self.config.source_id {
            Some(source_id) => tx.with_source_id(source_id),
            None => tx,
        })
    }

    /// Wrap any source into an Rx sharing this context's settings
    pub fn rx<S: MessageSource>(&self, source: S) -> Result<Rx<S>> {
        Ok(Rx::new(
            source,
            self.handler()?,
            self.config.retry.clone(),
            self.shutdown.clone(),
        ))
    }

    pub fn ring_sink(&self, name: &str, mode: RingMode) -> Result<RingSink> {
        let ring = self.open_ring(name, mode)?;
        Ok(RingSink::new(ring).with_red_zone(self.config.red_zone))
    }

    pub fn ring_source(&self, name: &str, mode: RingMode) -> Result<RingSource> {
        Ok(RingSource::new(self.open_ring(name, mode)?))
    }

    pub fn ring_tx(&self, name: &str, mode: RingMode) -> Result<Tx<RingSink>> {
        self.tx(self.ring_sink(name, mode)?)
    }

    pub fn ring_rx(&self, name: &str, mode: RingMode) -> Result<Rx<RingSource>> {
        self.rx(self.ring_source(name, mode)?)
    }

    pub fn tcp_tx(&self, address: &str) -> Result<Tx<TcpSink>> {
        self.tx(TcpSink::new(address, self.config.tcp.clone()))
    }

    pub fn tcp_rx(&self, address: &str) -> Result<Rx<TcpSource>> {
        self.rx(TcpSource::new(address, self.config.tcp.clone()))
    }

    pub fn file_tx(&self, path: impl Into<PathBuf>) -> Result<Tx<FileSink>> {
        self.tx(FileSink::create(path))
    }

    pub fn file_rx(&self, path: impl Into<PathBuf>) -> Result<Rx<FileSource>> {
        self.rx(FileSource::new(path))
    }

    /// Release every ring handle
    pub fn close(self) -> Result<()> {
        let mut first_error = None;
        for name in self.ring_names() {
            if let Err(e) = self.release_ring(&name) {
                warn!("failed to release ring {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        info!("stream context closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        message::{EventId, Record, RecordSet},
        transport::TransportState,
    };

    fn context(dir: &TempDir) -> StreamContext {
        let config = PipelineConfig::new()
            .with_ring(RingConfig::new("raw", 4096).with_dir(dir.path()))
            .with_source_id(99);
        StreamContext::new(config, ShutdownSignal::new()).unwrap()
    }

    #[test]
    fn test_open_ring_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);

        let first = ctx.open_ring("raw", RingMode::Create).unwrap();
        let second = ctx.open_ring("raw", RingMode::Attach).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.ring_names(), vec!["raw".to_string()]);
    }

    #[test]
    fn test_unknown_ring_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        assert!(matches!(
            ctx.open_ring("missing", RingMode::Open),
            Err(EventRingError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_ring_pair_stamps_source_id() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);

        let mut tx = ctx.ring_tx("raw", RingMode::Create).unwrap();
        let mut rx = ctx.ring_rx("raw", RingMode::Attach).unwrap();
        tx.connect().unwrap();
        rx.connect().unwrap();

        let mut records = RecordSet::new();
        records.insert(Record::new("hits", 4, vec![1, 2, 3])).unwrap();
        tx.send_event(EventId::new(1, 2, 3), &records).unwrap();

        let event = rx.recv_event().unwrap().unwrap();
        assert_eq!(event.header.source_id, 99);
        assert_eq!(event.records, records);
        assert_eq!(rx.state(), TransportState::Streaming);
    }

    #[test]
    fn test_release_unlinks_owned_ring() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        let path = ctx.ring_config("raw").unwrap().segment_config().path();

        ctx.open_ring("raw", RingMode::Create).unwrap();
        assert!(path.exists());
        ctx.close().unwrap();
        assert!(!path.exists());
    }
}
