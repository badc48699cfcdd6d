//! Tx/Rx transport pairs over rings, TCP sockets and sequential files
//!
//! A `Tx` serializes record sets and pushes them into a `MessageSink`; an `Rx`
//! takes messages from a `MessageSource` and deserializes them. Both retry
//! full/empty conditions with a bounded backoff and surface anything else as
//! a channel fault.

pub mod endpoint;
pub mod file;
pub mod retry;
pub mod ring;
pub mod rx;
pub mod state;
pub mod tcp;
pub mod tx;

pub use endpoint::{MessageSink, MessageSource};
pub use file::{FileSink, FileSource};
pub use retry::{Backoff, RetryPolicy};
pub use ring::{RingSink, RingSource};
pub use rx::Rx;
pub use state::TransportState;
pub use tcp::{TcpConfig, TcpSink, TcpSource};
pub use tx::Tx;

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::{
        error::EventRingError,
        message::{EventId, HandlerConfig, MessageHandler, MessageType, Record, RecordSet},
        pipeline::ShutdownSignal,
        ring::{RingBuffer, RingConfig},
    };

    fn records(event: u64) -> RecordSet {
        let mut set = RecordSet::new();
        set.insert(Record::new("raw", 1, event.to_le_bytes().to_vec()))
            .unwrap();
        set
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .with_timeout(Some(Duration::from_millis(200)))
    }

    fn ring(dir: &TempDir, name: &str, words: usize) -> Arc<RingBuffer> {
        Arc::new(RingBuffer::create(RingConfig::new(name, words).with_dir(dir.path())).unwrap())
    }

    #[test]
    fn test_ring_tx_rx_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let ring = ring(&temp_dir, "lifecycle", 4096);
        let shutdown = ShutdownSignal::new();

        let mut tx = Tx::new(
            RingSink::new(ring.clone()),
            MessageHandler::default(),
            quick_retry(),
            shutdown.clone(),
        );
        let mut rx = Rx::new(
            RingSource::new(ring),
            MessageHandler::default(),
            quick_retry(),
            shutdown,
        );

        assert_eq!(tx.state(), TransportState::Idle);
        tx.connect().unwrap();
        rx.connect().unwrap();
        assert_eq!(tx.state(), TransportState::Connected);

        tx.send_run_marker(MessageType::BeginRun, EventId::new(1, 7, 0))
            .unwrap();
        assert_eq!(tx.state(), TransportState::Streaming);
        for i in 1..=5 {
            tx.send_event(EventId::new(1, 7, i), &records(i)).unwrap();
        }
        tx.finish().unwrap();
        assert_eq!(tx.state(), TransportState::Closed);
        assert_eq!(tx.last_event(), Some(5));

        let marker = rx.recv_event().unwrap().unwrap();
        assert_eq!(marker.header.msg_type, MessageType::BeginRun);
        for i in 1..=5 {
            let event = rx.recv_event().unwrap().unwrap();
            assert_eq!(event.header.id.event, i);
            assert_eq!(event.header.sequence, i);
            assert_eq!(event.records, records(i));
        }
        assert!(rx.recv_event().unwrap().is_none());
        assert_eq!(rx.state(), TransportState::Draining);
        rx.close().unwrap();
        assert_eq!(rx.state(), TransportState::Closed);
    }

    #[test]
    fn test_full_ring_times_out_into_fault() {
        let temp_dir = TempDir::new().unwrap();
        let ring = ring(&temp_dir, "stuck", 64);
        let mut tx = Tx::new(
            RingSink::new(ring),
            MessageHandler::new(HandlerConfig::new()).unwrap(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        tx.connect().unwrap();

        let mut result = Ok(());
        for i in 0..10 {
            result = tx.send_event(EventId::new(0, 0, i), &records(i));
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(matches!(err, EventRingError::Faulted { .. }));
        assert!(matches!(
            err.fault_cause(),
            Some(EventRingError::Timeout { .. })
        ));
        assert_eq!(tx.state(), TransportState::Faulted);
    }

    #[test]
    fn test_empty_ring_honours_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let shutdown = ShutdownSignal::new();
        let mut rx = Rx::new(
            RingSource::new(ring(&temp_dir, "idle", 256)),
            MessageHandler::default(),
            RetryPolicy::new().with_timeout(None),
            shutdown.clone(),
        );
        rx.connect().unwrap();
        shutdown.trigger();
        assert!(matches!(rx.recv_event(), Err(EventRingError::Shutdown)));
        assert_eq!(rx.state(), TransportState::Connected);
    }

    #[test]
    fn test_corrupt_message_faults_rx() {
        let temp_dir = TempDir::new().unwrap();
        let ring = ring(&temp_dir, "garbage", 1024);
        ring.insert_bytes(&[7u8; 80]).unwrap();

        let mut rx = Rx::new(
            RingSource::new(ring),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        rx.connect().unwrap();
        let err = rx.recv_event().unwrap_err();
        assert!(err.fault_cause().map_or(false, |c| c.is_malformed_data()));
        assert_eq!(rx.state(), TransportState::Faulted);
    }

    #[test]
    fn test_oversized_event_leaves_ring_channel_usable() {
        let temp_dir = TempDir::new().unwrap();
        let ring = ring(&temp_dir, "narrow", 4096);
        let mut tx = Tx::new(
            RingSink::new(ring.clone()),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        tx.connect().unwrap();

        let mut big = RecordSet::new();
        big.insert(Record::new("raw", 1, vec![0u8; 10_000])).unwrap();
        let err = tx.send_event(EventId::new(1, 1, 0), &big).unwrap_err();
        assert!(matches!(err, EventRingError::Encoding { .. }));
        assert_ne!(tx.state(), TransportState::Faulted);

        tx.send_event(EventId::new(1, 1, 1), &records(1)).unwrap();
        assert_eq!(tx.state(), TransportState::Streaming);

        let mut rx = Rx::new(
            RingSource::new(ring),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        rx.connect().unwrap();
        let event = rx.recv_event().unwrap().unwrap();
        assert_eq!(event.header.id.event, 1);
        assert_eq!(event.records, records(1));
    }

    #[test]
    fn test_file_tx_rx() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("spool.seq");

        let mut tx = Tx::new(
            FileSink::create(&path),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        tx.connect().unwrap();
        for i in 0..3 {
            tx.send_event(EventId::new(2, 1, i), &records(i)).unwrap();
        }
        tx.finish().unwrap();

        let mut rx = Rx::new(
            FileSource::new(&path),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        rx.connect().unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv_event().unwrap() {
            events.push(event.header.id.event);
        }
        assert_eq!(events, vec![0, 1, 2]);
    }

    #[test]
    fn test_tcp_without_listener_stays_connected() {
        // reserve a port, then free it so nothing listens there
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut tx = Tx::new(
            TcpSink::new(address, TcpConfig::new()),
            MessageHandler::default(),
            quick_retry(),
            ShutdownSignal::new(),
        );
        tx.connect().unwrap();

        let started = std::time::Instant::now();
        let err = tx.send_event(EventId::default(), &records(0)).unwrap_err();
        assert!(matches!(err, EventRingError::Connection { .. }));
        assert_eq!(tx.state(), TransportState::Connected);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_tcp_round_trip() {
        let shutdown = ShutdownSignal::new();
        let source = TcpSource::bind("127.0.0.1:0", TcpConfig::new()).unwrap();
        let address = source.local_addr().unwrap().to_string();

        let sender = std::thread::spawn(move || {
            let mut tx = Tx::new(
                TcpSink::new(address, TcpConfig::new()),
                MessageHandler::default(),
                RetryPolicy::new(),
                ShutdownSignal::new(),
            );
            tx.connect().unwrap();
            for i in 0..20 {
                tx.send_event(EventId::new(3, 3, i), &records(i)).unwrap();
            }
            tx.finish().unwrap();
        });

        let mut rx = Rx::new(source, MessageHandler::default(), RetryPolicy::new(), shutdown);
        rx.connect().unwrap();
        let mut count = 0;
        while let Some(event) = rx.recv_event().unwrap() {
            assert_eq!(event.header.id.event, count);
            count += 1;
        }
        assert_eq!(count, 20);
        sender.join().unwrap();
    }
}
