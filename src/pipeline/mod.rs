//! Pipeline stages and the context that wires them to channels
//!
//! A producer stage pulls record sets from an [`EventSource`] and sends them
//! through a `Tx`; a consumer stage receives through an `Rx` and invokes an
//! [`EventConsumer`] once per event. A [`Driver`] runs either kind until the
//! stream ends or the [`ShutdownSignal`] fires.

pub mod config;
pub mod context;
pub mod driver;
pub mod shutdown;
pub mod stage;

pub use config::PipelineConfig;
pub use context::{RingMode, StreamContext};
pub use driver::{Driver, DriverReport};
pub use shutdown::ShutdownSignal;
pub use stage::{
    ConsumerStage, DynConsumer, DynProducer, EventConsumer, EventSource, PipelineStage,
    ProducerStage, SourceEvent, Stage, StepOutcome,
};

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        error::Result,
        message::{DecodedEvent, EventId, MessageType, Record, RecordSet},
        ring::RingConfig,
        transport::{FileSink, MessageSink},
    };

    struct Counter {
        next: u64,
        total: u64,
    }

    impl EventSource for Counter {
        fn next_event_records(&mut self) -> Result<Option<SourceEvent>> {
            if self.next == 0 {
                self.next += 1;
                return Ok(Some(SourceEvent::marker(
                    MessageType::BeginRun,
                    EventId::new(1, 1, 0),
                )));
            }
            if self.next > self.total {
                return Ok(None);
            }
            let mut records = RecordSet::new();
            records.insert(Record::new("n", 1, self.next.to_le_bytes().to_vec()))?;
            let event = SourceEvent::event(EventId::new(1, 1, self.next), records);
            self.next += 1;
            Ok(Some(event))
        }
    }

    #[derive(Default)]
    struct Collect {
        seen: Vec<(MessageType, u64)>,
        ended: bool,
    }

    impl EventConsumer for Collect {
        fn on_event_available(&mut self, event: DecodedEvent) -> Result<()> {
            self.seen.push((event.header.msg_type, event.header.id.event));
            Ok(())
        }

        fn on_end_of_stream(&mut self) -> Result<()> {
            self.ended = true;
            Ok(())
        }
    }

    #[test]
    fn test_producer_and_consumer_stages_over_a_ring() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            PipelineConfig::new().with_ring(RingConfig::new("stage", 8192).with_dir(temp_dir.path()));
        let ctx = StreamContext::new(config, ShutdownSignal::new()).unwrap();

        let mut producer = ProducerStage::new(
            "producer",
            ctx.ring_tx("stage", RingMode::Create).unwrap(),
            Counter { next: 0, total: 25 },
        );
        let mut consumer = ConsumerStage::new(
            "consumer",
            ctx.ring_rx("stage", RingMode::Attach).unwrap(),
            Collect::default(),
        );

        let driver = Driver::new(ctx.shutdown().clone());
        let produced = driver.run(&mut producer).unwrap();
        assert_eq!(produced.events, 26);

        let consumed = driver.run(&mut consumer).unwrap();
        assert_eq!(consumed.events, 26);
        let collected = consumer.into_consumer();
        assert!(collected.ended);
        assert_eq!(collected.seen[0], (MessageType::BeginRun, 0));
        let events: Vec<u64> = collected.seen[1..].iter().map(|(_, e)| *e).collect();
        assert_eq!(events, (1..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_dynamic_stage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stage.seq");
        let ctx = StreamContext::new(PipelineConfig::new(), ShutdownSignal::new()).unwrap();

        let sink: Box<dyn MessageSink> = Box::new(FileSink::create(&path));
        let source: Box<dyn EventSource + Send> = Box::new(Counter { next: 1, total: 3 });
        let mut stage = Stage::Producer(ProducerStage::new("to-file", ctx.tx(sink).unwrap(), source));

        let report = Driver::new(ShutdownSignal::new()).run(&mut stage).unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(stage.name(), "to-file");

        let mut rx = ctx.file_rx(&path).unwrap();
        rx.connect().unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv_event().unwrap() {
            events.push(event.header.id.event);
        }
        assert_eq!(events, vec![1, 2, 3]);
    }
}
