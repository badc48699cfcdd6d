//! Producer and consumer stages with a start/step/stop lifecycle

use log::{debug, info};

use crate::{
    error::Result,
    message::{DecodedEvent, EventId, MessageType, RecordSet},
    transport::{MessageSink, MessageSource, Rx, Tx},
};

/// One unit of work pulled from the producer side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub msg_type: MessageType,
    pub id: EventId,
    pub records: RecordSet,
}

impl SourceEvent {
    pub fn event(id: EventId, records: RecordSet) -> Self {
        Self {
            msg_type: MessageType::Event,
            id,
            records,
        }
    }

    /// Run boundary marker without records
    pub fn marker(msg_type: MessageType, id: EventId) -> Self {
        Self {
            msg_type,
            id,
            records: RecordSet::new(),
        }
    }
}

/// Supplies the records of the next event; `None` ends the stream
pub trait EventSource {
    fn next_event_records(&mut self) -> Result<Option<SourceEvent>>;
}

/// Receives every event once it has been deserialized
pub trait EventConsumer {
    fn on_event_available(&mut self, event: DecodedEvent) -> Result<()>;

    /// Called once after the last event
    fn on_end_of_stream(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn next_event_records(&mut self) -> Result<Option<SourceEvent>> {
        (**self).next_event_records()
    }
}

impl<T: EventConsumer + ?Sized> EventConsumer for Box<T> {
    fn on_event_available(&mut self, event: DecodedEvent) -> Result<()> {
        (**self).on_event_available(event)
    }

    fn on_end_of_stream(&mut self) -> Result<()> {
        (**self).on_end_of_stream()
    }
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One event was transferred
    Continue,
    /// The stream ended
    Finished,
}

/// Lifecycle shared by every stage
pub trait PipelineStage {
    /// Acquire the transport
    fn start(&mut self) -> Result<()>;

    /// Transfer one event
    fn step(&mut self) -> Result<StepOutcome>;

    /// Release the transport; called on every exit path
    fn stop(&mut self) -> Result<()>;

    /// Events transferred so far
    fn events(&self) -> u64;

    fn name(&self) -> &str;
}

/// Pulls events from an `EventSource` and sends them with a `Tx`
pub struct ProducerStage<S: MessageSink, E: EventSource> {
    name: String,
    tx: Tx<S>,
    source: E,
    events: u64,
    finished: bool,
}

impl<S: MessageSink, E: EventSource> ProducerStage<S, E> {
    pub fn new(name: impl Into<String>, tx: Tx<S>, source: E) -> Self {
        Self {
            name: name.into(),
            tx,
            source,
            events: 0,
            finished: false,
        }
    }

    pub fn tx(&self) -> &Tx<S> {
        &self.tx
    }
}

impl<S: MessageSink, E: EventSource> PipelineStage for ProducerStage<S, E> {
    fn start(&mut self) -> Result<()> {
        info!("starting producer {} on {}", self.name, self.tx.channel());
        self.tx.connect()
    }

    fn step(&mut self) -> Result<StepOutcome> {
        if self.finished {
            return Ok(StepOutcome::Finished);
        }
        match self.source.next_event_records()? {
            Some(event) => {
                match event.msg_type {
                    MessageType::Event => self.tx.send_event(event.id, &event.records)?,
                    MessageType::Terminate => {
                        self.tx.finish()?;
                        self.finished = true;
                        return Ok(StepOutcome::Finished);
                    }
                    marker => self.tx.send_run_marker(marker, event.id)?,
                }
                self.events += 1;
                Ok(StepOutcome::Continue)
            }
            None => {
                debug!("producer {}: source exhausted", self.name);
                self.tx.finish()?;
                self.finished = true;
                Ok(StepOutcome::Finished)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        info!("stopping producer {} after {} events", self.name, self.events);
        self.tx.close()
    }

    fn events(&self) -> u64 {
        self.events
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Receives events with an `Rx` and hands them to an `EventConsumer`
pub struct ConsumerStage<S: MessageSource, C: EventConsumer> {
    name: String,
    rx: Rx<S>,
    consumer: C,
    events: u64,
    finished: bool,
}

impl<S: MessageSource, C: EventConsumer> ConsumerStage<S, C> {
    pub fn new(name: impl Into<String>, rx: Rx<S>, consumer: C) -> Self {
        Self {
            name: name.into(),
            rx,
            consumer,
            events: 0,
            finished: false,
        }
    }

    pub fn rx(&self) -> &Rx<S> {
        &self.rx
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }
}

impl<S: MessageSource, C: EventConsumer> PipelineStage for ConsumerStage<S, C> {
    fn start(&mut self) -> Result<()> {
        info!("starting consumer {} on {}", self.name, self.rx.channel());
        self.rx.connect()
    }

    fn step(&mut self) -> Result<StepOutcome> {
        if self.finished {
            return Ok(StepOutcome::Finished);
        }
        match self.rx.recv_event()? {
            Some(event) => {
                self.consumer.on_event_available(event)?;
                self.events += 1;
                Ok(StepOutcome::Continue)
            }
            None => {
                self.finished = true;
                self.consumer.on_end_of_stream()?;
                Ok(StepOutcome::Finished)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        info!("stopping consumer {} after {} events", self.name, self.events);
        self.rx.close()
    }

    fn events(&self) -> u64 {
        self.events
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Dynamically chosen producer
pub type DynProducer = ProducerStage<Box<dyn MessageSink>, Box<dyn EventSource + Send>>;

/// Dynamically chosen consumer
pub type DynConsumer = ConsumerStage<Box<dyn MessageSource>, Box<dyn EventConsumer + Send>>;

/// The closed set of stages a driver can run
pub enum Stage {
    Producer(DynProducer),
    Consumer(DynConsumer),
}

impl PipelineStage for Stage {
    fn start(&mut self) -> Result<()> {
        match self {
            Stage::Producer(stage) => stage.start(),
            Stage::Consumer(stage) => stage.start(),
        }
    }

    fn step(&mut self) -> Result<StepOutcome> {
        match self {
            Stage::Producer(stage) => stage.step(),
            Stage::Consumer(stage) => stage.step(),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self {
            Stage::Producer(stage) => stage.stop(),
            Stage::Consumer(stage) => stage.stop(),
        }
    }

    fn events(&self) -> u64 {
        match self {
            Stage::Producer(stage) => stage.events(),
            Stage::Consumer(stage) => stage.events(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Stage::Producer(stage) => stage.name(),
            Stage::Consumer(stage) => stage.name(),
        }
    }
}
