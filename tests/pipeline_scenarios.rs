//! End-to-end pipeline scenarios
//! Producer and consumer processes emulated by threads with separate ring handles

use std::{
    net::TcpListener,
    thread,
    time::{Duration, Instant},
};

use eventring::{
    error::{EventRingError, Result},
    message::{DecodedEvent, EventId, MessageHandler, Record, RecordFlags, RecordSet},
    pipeline::{
        ConsumerStage, Driver, EventConsumer, EventSource, PipelineConfig, ProducerStage,
        RingMode, ShutdownSignal, SourceEvent, StreamContext,
    },
    ring::RingConfig,
    seqfile::SeqFileReader,
    transport::{
        FileSink, RetryPolicy, RingSource, Rx, TcpConfig, TcpSink, TransportState, Tx,
    },
};
use tempfile::TempDir;

fn event_records(event: u64) -> RecordSet {
    let mut records = RecordSet::new();
    records
        .insert(Record::new("raw", 1, vec![(event % 251) as u8; 64 + (event % 300) as usize]))
        .unwrap();
    records
        .insert(
            Record::new("trigger", 2, (event as u32).to_le_bytes().to_vec())
                .with_flags(RecordFlags::PERSISTENT),
        )
        .unwrap();
    records
}

/// Sweeps every hundred events from one 10 byte record up to fifty records
/// of 10 KiB, so the largest messages take nearly half of a 1 MiB ring
fn sized_records(event: u64) -> RecordSet {
    let step = (event % 100) as usize;
    let count = 1 + step * 49 / 99;
    let size = 10 + step * (10 * 1024 - 10) / 99;
    let mut records = RecordSet::new();
    for index in 0..count {
        let fill = (event as usize).wrapping_mul(31).wrapping_add(index) as u8;
        records
            .insert(Record::new(format!("r{:02}", index), index as u32, vec![fill; size]))
            .unwrap();
    }
    records
}

struct Numbered {
    next: u64,
    count: u64,
    records: fn(u64) -> RecordSet,
}

impl EventSource for Numbered {
    fn next_event_records(&mut self) -> Result<Option<SourceEvent>> {
        if self.next >= self.count {
            return Ok(None);
        }
        let event = self.next;
        self.next += 1;
        Ok(Some(SourceEvent::event(
            EventId::new(1, 42, event),
            (self.records)(event),
        )))
    }
}

struct Checker {
    received: Vec<u64>,
    ended: bool,
    records: fn(u64) -> RecordSet,
}

impl Checker {
    fn new(records: fn(u64) -> RecordSet) -> Self {
        Self {
            received: Vec::new(),
            ended: false,
            records,
        }
    }
}

impl EventConsumer for Checker {
    fn on_event_available(&mut self, event: DecodedEvent) -> Result<()> {
        let id = event.header.id.event;
        if event.records != (self.records)(id) {
            return Err(EventRingError::decoding(format!("event {} changed in transit", id)));
        }
        self.received.push(id);
        Ok(())
    }

    fn on_end_of_stream(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }
}

fn ring_pipeline(dir: &TempDir, name: &str) -> PipelineConfig {
    PipelineConfig::new()
        .with_ring(RingConfig::new(name, 262_144).with_dir(dir.path()))
        .with_retry(RetryPolicy::new().with_timeout(Some(Duration::from_secs(20))))
}

/// Scenario A: 1000 events of 10 B to 500 KiB through a 1 MiB ring, producer
/// and consumer with separate handles, every event delivered once and in order.
#[test]
fn scenario_a_ring_delivers_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = ring_pipeline(&temp_dir, "scenario_a");

    // the owner keeps the channel alive for both stages
    let owner = StreamContext::new(config.clone(), ShutdownSignal::new()).unwrap();
    owner.open_ring("scenario_a", RingMode::Create).unwrap();

    let consumer_config = config.clone();
    let consumer = thread::spawn(move || {
        let ctx = StreamContext::new(consumer_config, ShutdownSignal::new()).unwrap();
        let mut stage = ConsumerStage::new(
            "consumer",
            ctx.ring_rx("scenario_a", RingMode::Attach).unwrap(),
            Checker::new(sized_records),
        );
        let report = Driver::new(ctx.shutdown().clone()).run(&mut stage).unwrap();
        assert_eq!(stage.rx().state(), TransportState::Closed);
        (report.events, stage.into_consumer())
    });

    let producer = thread::spawn(move || {
        let ctx = StreamContext::new(config, ShutdownSignal::new()).unwrap();
        let mut stage = ProducerStage::new(
            "producer",
            ctx.ring_tx("scenario_a", RingMode::Attach).unwrap(),
            Numbered {
                next: 0,
                count: 1000,
                records: sized_records,
            },
        );
        Driver::new(ctx.shutdown().clone()).run(&mut stage).unwrap().events
    });

    assert_eq!(producer.join().unwrap(), 1000);
    let (events, checker) = consumer.join().unwrap();
    assert_eq!(events, 1000);
    assert!(checker.ended);
    assert_eq!(checker.received, (0..1000).collect::<Vec<_>>());

    let ring = owner.ring("scenario_a").unwrap();
    assert!(ring.is_empty());
    assert_eq!(ring.status().ninsq, 1001); // events plus the terminate marker
    drop(ring);
    owner.close().unwrap();
}

/// Scenario B: a Tx pointed at an address with no listener reports a
/// connection error within its retry bound and never starts streaming.
#[test]
fn scenario_b_tcp_without_listener() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let retry = RetryPolicy::new()
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .with_timeout(Some(Duration::from_millis(300)));
    let mut tx = Tx::new(
        TcpSink::new(address, TcpConfig::new().with_connect_timeout(Duration::from_millis(100))),
        MessageHandler::default(),
        retry,
        ShutdownSignal::new(),
    );
    tx.connect().unwrap();

    let started = Instant::now();
    let err = tx.send_event(EventId::new(1, 1, 1), &event_records(1)).unwrap_err();
    assert!(matches!(err, EventRingError::Connection { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(tx.state(), TransportState::Connected);
    assert_eq!(tx.sent(), 0);

    tx.close().unwrap();
    assert_eq!(tx.state(), TransportState::Closed);
}

/// Scenario C: 500 events spooled to a file, the writer vanishes after the
/// last flush, and a fresh reader replays all 500 byte for byte.
#[test]
fn scenario_c_spool_and_replay() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("scenario_c.seq");
    let handler = MessageHandler::default();

    let mut tx = Tx::new(
        FileSink::create(&path),
        handler.clone(),
        RetryPolicy::new(),
        ShutdownSignal::new(),
    )
    .with_source_id(7);
    tx.connect().unwrap();
    for event in 0..500 {
        tx.send_event(EventId::new(1, 5, event), &event_records(event))
            .unwrap();
    }
    tx.finish().unwrap();

    let mut reader = SeqFileReader::open(&path).unwrap();
    for event in 0..500u64 {
        let message = reader.read_next().unwrap().unwrap();
        let decoded = handler.decode(&message).unwrap();
        assert_eq!(decoded.header.id.event, event);
        assert_eq!(decoded.header.sequence, event);
        assert_eq!(decoded.header.source_id, 7);
        assert_eq!(decoded.records, event_records(event));
    }
    let terminate = reader.read_next().unwrap().unwrap();
    assert!(terminate.is_terminate());
    assert!(reader.read_next().unwrap().is_none());
}

/// A consumer waiting on an idle ring stops promptly once shutdown is requested
#[test]
fn consumer_stops_on_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let config = ring_pipeline(&temp_dir, "idle")
        .with_retry(RetryPolicy::new().with_timeout(None));
    let shutdown = ShutdownSignal::new();
    let ctx = StreamContext::new(config, shutdown.clone()).unwrap();

    let ring = ctx.open_ring("idle", RingMode::Create).unwrap();
    let rx: Rx<RingSource> = ctx.rx(RingSource::new(ring)).unwrap();
    let mut stage = ConsumerStage::new("idle", rx, Checker::new(event_records));

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        shutdown.trigger();
    });
    let report = Driver::new(ctx.shutdown().clone()).run(&mut stage).unwrap();
    trigger.join().unwrap();

    assert!(report.interrupted);
    assert_eq!(report.events, 0);
    assert!(!stage.consumer().ended);
}

/// A corrupted message faults its own channel and leaves a sibling ring untouched
#[test]
fn fault_is_confined_to_its_channel() {
    let temp_dir = TempDir::new().unwrap();
    let config = ring_pipeline(&temp_dir, "bad").with_ring(
        RingConfig::new("good", 4096).with_dir(temp_dir.path()),
    );
    let ctx = StreamContext::new(config, ShutdownSignal::new()).unwrap();

    let bad = ctx.open_ring("bad", RingMode::Create).unwrap();
    bad.insert_bytes(&[0xEE; 128]).unwrap();
    let mut good_tx = ctx.ring_tx("good", RingMode::Create).unwrap();
    good_tx.connect().unwrap();
    good_tx.send_event(EventId::new(1, 1, 9), &event_records(9)).unwrap();

    let mut bad_rx = ctx.ring_rx("bad", RingMode::Attach).unwrap();
    bad_rx.connect().unwrap();
    let err = bad_rx.recv_event().unwrap_err();
    assert!(matches!(err, EventRingError::Faulted { .. }));
    assert!(err.fault_cause().map_or(false, |cause| cause.is_malformed_data()));
    assert_eq!(bad_rx.state(), TransportState::Faulted);

    let mut good_rx = ctx.ring_rx("good", RingMode::Attach).unwrap();
    good_rx.connect().unwrap();
    let event = good_rx.recv_event().unwrap().unwrap();
    assert_eq!(event.header.id.event, 9);
}
