use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use eventring::{
    error::EventRingError,
    memory::SharedSegment,
    message::{EventId, MessageHandler, MessageType, Record, RecordFlags, RecordSet},
    pipeline::{
        ConsumerStage, Driver, DriverReport, EventConsumer, EventSource, PipelineConfig,
        ProducerStage, RingMode, ShutdownSignal, SourceEvent, Stage, StreamContext,
    },
    ring::{RingBuffer, RingConfig},
    seqfile::SeqFileWriter,
    transport::{MessageSink, MessageSource},
    DecodedEvent, Result,
};
use log::{debug, info};
use std::{path::PathBuf, str::FromStr, thread, time::Duration};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let ring_arg = || {
        Arg::with_name("ring")
            .short("r")
            .long("ring")
            .value_name("NAME")
            .help("Ring channel name")
            .takes_value(true)
    };

    let matches = App::new("eventring")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shared-memory event ring tool")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Pipeline configuration (TOML)")
                .global(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dir")
                .short("d")
                .long("dir")
                .value_name("DIR")
                .help("Directory holding ring segments")
                .global(true)
                .takes_value(true),
        )
        .subcommand(
            SubCommand::with_name("create")
                .about("Create a ring and keep it alive until interrupted")
                .arg(ring_arg().required(true))
                .arg(
                    Arg::with_name("capacity")
                        .short("w")
                        .long("capacity")
                        .value_name("WORDS")
                        .help("Capacity in 32-bit words")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("SECS")
                        .help("Print the ring status every SECS seconds")
                        .default_value("0")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("produce")
                .about("Send synthetic events")
                .arg(ring_arg().conflicts_with_all(&["file", "connect"]))
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .long("file")
                        .value_name("PATH")
                        .help("Write to a sequential file")
                        .conflicts_with("connect")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("connect")
                        .long("connect")
                        .value_name("ADDR")
                        .help("Send to a TCP receiver")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of events")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("BYTES")
                        .help("Payload bytes per event")
                        .default_value("256")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("experiment")
                        .long("experiment")
                        .value_name("EXP")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("run")
                        .long("run")
                        .value_name("RUN")
                        .default_value("1")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("consume")
                .about("Receive events until the stream ends")
                .arg(ring_arg().conflicts_with_all(&["file", "listen"]))
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .long("file")
                        .value_name("PATH")
                        .help("Replay a sequential file")
                        .conflicts_with("listen")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("listen")
                        .long("listen")
                        .value_name("ADDR")
                        .help("Accept one TCP sender")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("spool")
                        .long("spool")
                        .value_name("PATH")
                        .help("Also write every event to a sequential file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("max")
                        .short("m")
                        .long("max")
                        .value_name("COUNT")
                        .help("Stop after COUNT events")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("stat")
                .about("Print the shared state of a ring")
                .arg(ring_arg().required(true))
                .arg(
                    Arg::with_name("capacity")
                        .short("w")
                        .long("capacity")
                        .value_name("WORDS")
                        .help("Capacity in 32-bit words")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("remove")
                .about("Remove a ring left behind by a dead owner")
                .arg(ring_arg().required(true))
                .arg(
                    Arg::with_name("capacity")
                        .short("w")
                        .long("capacity")
                        .value_name("WORDS")
                        .help("Capacity in 32-bit words")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = matches.value_of("dir") {
        let dir = PathBuf::from(dir);
        for ring in &mut config.rings {
            ring.dir = Some(dir.clone());
        }
    }

    match matches.subcommand() {
        ("create", Some(sub)) => handle_create(&matches, sub, config),
        ("produce", Some(sub)) => handle_produce(&matches, sub, config),
        ("consume", Some(sub)) => handle_consume(&matches, sub, config),
        ("stat", Some(sub)) => handle_stat(&matches, sub, &config),
        ("remove", Some(sub)) => handle_remove(&matches, sub, &config),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    matches
        .value_of(name)
        .map(|value| {
            value.parse().map_err(|_| {
                EventRingError::invalid_parameter(name, format!("Invalid value '{}'", value))
            })
        })
        .transpose()
}

fn required_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    parse_arg(matches, name)?
        .ok_or_else(|| EventRingError::invalid_parameter(name, "Missing value"))
}

/// Ring settings from the config file, or built from the command line
fn ring_config(
    global: &ArgMatches,
    sub: &ArgMatches,
    config: &PipelineConfig,
    name: &str,
) -> Result<RingConfig> {
    let mut ring = match config.ring(name) {
        Some(ring) => ring.clone(),
        None => RingConfig::new(name, eventring::config::DEFAULT_RING_CAPACITY_WORDS),
    };
    if let Some(capacity) = parse_arg(sub, "capacity")? {
        ring.capacity_words = capacity;
    }
    if let Some(dir) = global.value_of("dir") {
        ring = ring.with_dir(dir);
    }
    Ok(ring)
}

/// Make sure `name` is known to the config before a context is built from it
fn with_ring(
    global: &ArgMatches,
    sub: &ArgMatches,
    mut config: PipelineConfig,
    name: &str,
) -> Result<PipelineConfig> {
    let ring = ring_config(global, sub, &config, name)?;
    config.rings.retain(|r| r.name != name);
    Ok(config.with_ring(ring))
}

fn print_report(report: &DriverReport) {
    println!(
        "{}: {} events in {:.3}s ({:.0} events/s){}",
        report.stage,
        report.events,
        report.elapsed.as_secs_f64(),
        report.events_per_second(),
        if report.interrupted { ", interrupted" } else { "" }
    );
}

fn handle_create(global: &ArgMatches, sub: &ArgMatches, config: PipelineConfig) -> Result<()> {
    let name: String = required_arg(sub, "ring")?;
    let interval: u64 = required_arg(sub, "interval")?;
    let config = with_ring(global, sub, config, &name)?;

    let ctx = StreamContext::new(config, ShutdownSignal::from_process_signals()?)?;
    let ring = ctx.open_ring(&name, RingMode::Create)?;
    println!("Created ring '{}' with {} words", ring.name(), ring.capacity_words());
    println!("Press Ctrl-C to remove it");

    let tick = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while !ctx.shutdown().is_triggered() {
        thread::sleep(tick);
        waited += tick;
        if interval > 0 && waited >= Duration::from_secs(interval) {
            waited = Duration::ZERO;
            println!("{}", ring.status());
        }
    }

    drop(ring);
    ctx.close()?;
    println!("Removed ring '{}'", name);
    Ok(())
}

/// Synthetic run: begin-run marker, `count` events, end-run marker
struct SyntheticEvents {
    experiment: u32,
    run: u32,
    count: u64,
    payload_size: usize,
    next: u64,
}

impl EventSource for SyntheticEvents {
    fn next_event_records(&mut self) -> Result<Option<SourceEvent>> {
        let position = self.next;
        self.next += 1;

        if position == 0 {
            return Ok(Some(SourceEvent::marker(
                MessageType::BeginRun,
                EventId::new(self.experiment, self.run, 0),
            )));
        }
        if position == self.count + 1 {
            return Ok(Some(SourceEvent::marker(
                MessageType::EndRun,
                EventId::new(self.experiment, self.run, self.count),
            )));
        }
        if position > self.count + 1 {
            return Ok(None);
        }

        let event = position;
        let payload: Vec<u8> = (0..self.payload_size)
            .map(|i| (event as usize + i) as u8)
            .collect();
        let mut records = RecordSet::new();
        records.insert(Record::new("raw", 1, payload))?;
        records.insert(
            Record::new("trigger", 2, (event as u32 % 8).to_le_bytes().to_vec())
                .with_flags(RecordFlags::PERSISTENT),
        )?;
        Ok(Some(SourceEvent::event(
            EventId::new(self.experiment, self.run, event),
            records,
        )))
    }
}

fn handle_produce(global: &ArgMatches, sub: &ArgMatches, config: PipelineConfig) -> Result<()> {
    let source = SyntheticEvents {
        experiment: required_arg(sub, "experiment")?,
        run: required_arg(sub, "run")?,
        count: required_arg(sub, "count")?,
        payload_size: required_arg(sub, "size")?,
        next: 0,
    };

    let (config, ring) = match sub.value_of("ring") {
        Some(name) => (with_ring(global, sub, config, name)?, Some(name)),
        None => (config, None),
    };
    let ctx = StreamContext::new(config, ShutdownSignal::from_process_signals()?)?;

    let sink: Box<dyn MessageSink> = match (ring, sub.value_of("file"), sub.value_of("connect")) {
        (Some(name), _, _) => Box::new(ctx.ring_sink(name, RingMode::Attach)?),
        (None, Some(path), _) => Box::new(eventring::transport::FileSink::create(path)),
        (None, None, Some(address)) => Box::new(eventring::transport::TcpSink::new(
            address,
            ctx.config().tcp.clone(),
        )),
        (None, None, None) => {
            return Err(EventRingError::invalid_parameter(
                "target",
                "One of --ring, --file or --connect is required",
            ))
        }
    };

    let source: Box<dyn EventSource + Send> = Box::new(source);
    let mut stage = Stage::Producer(ProducerStage::new("produce", ctx.tx(sink)?, source));
    let report = Driver::new(ctx.shutdown().clone()).run(&mut stage)?;
    print_report(&report);
    drop(stage);
    ctx.close()
}

/// Counts events and optionally spools them to a file
struct SpoolConsumer {
    handler: MessageHandler,
    spool: Option<SeqFileWriter>,
    records: u64,
    bytes: u64,
}

impl EventConsumer for SpoolConsumer {
    fn on_event_available(&mut self, event: DecodedEvent) -> Result<()> {
        self.records += event.records.len() as u64;
        self.bytes += event.records.payload_bytes() as u64;
        debug!(
            "{:?} {} from source {} seq {}",
            event.header.msg_type, event.header.id, event.header.source_id, event.header.sequence
        );
        if let Some(spool) = self.spool.as_mut() {
            let message = self.handler.serialize(event.header.meta(), &event.records)?;
            spool.append(&message)?;
        }
        Ok(())
    }

    fn on_end_of_stream(&mut self) -> Result<()> {
        if let Some(spool) = self.spool.take() {
            let frames = spool.frames_written();
            spool.close()?;
            info!("spooled {} frames", frames);
        }
        println!("{} records, {} payload bytes", self.records, self.bytes);
        Ok(())
    }
}

fn handle_consume(global: &ArgMatches, sub: &ArgMatches, config: PipelineConfig) -> Result<()> {
    let (config, ring) = match sub.value_of("ring") {
        Some(name) => (with_ring(global, sub, config, name)?, Some(name)),
        None => (config, None),
    };
    let ctx = StreamContext::new(config, ShutdownSignal::from_process_signals()?)?;

    let source: Box<dyn MessageSource> = match (ring, sub.value_of("file"), sub.value_of("listen")) {
        (Some(name), _, _) => Box::new(ctx.ring_source(name, RingMode::Attach)?),
        (None, Some(path), _) => Box::new(eventring::transport::FileSource::new(path)),
        (None, None, Some(address)) => Box::new(eventring::transport::TcpSource::new(
            address,
            ctx.config().tcp.clone(),
        )),
        (None, None, None) => {
            return Err(EventRingError::invalid_parameter(
                "source",
                "One of --ring, --file or --listen is required",
            ))
        }
    };

    let spool = match sub.value_of("spool") {
        Some(path) => Some(SeqFileWriter::create(path)?),
        None => None,
    };
    let consumer = SpoolConsumer {
        handler: ctx.handler()?,
        spool,
        records: 0,
        bytes: 0,
    };

    let mut driver = Driver::new(ctx.shutdown().clone());
    if let Some(max) = parse_arg(sub, "max")? {
        driver = driver.with_max_events(max);
    }
    let consumer: Box<dyn EventConsumer + Send> = Box::new(consumer);
    let mut stage = Stage::Consumer(ConsumerStage::new("consume", ctx.rx(source)?, consumer));
    let report = driver.run(&mut stage)?;
    print_report(&report);
    drop(stage);
    ctx.close()
}

fn handle_stat(global: &ArgMatches, sub: &ArgMatches, config: &PipelineConfig) -> Result<()> {
    let name: String = required_arg(sub, "ring")?;
    let ring = RingBuffer::attach(ring_config(global, sub, config, &name)?)?;

    let status = ring.status();
    println!("{}", status);
    println!("  max frame payload: {} words", ring.max_payload_words());
    if ring.is_above_red_zone(config.red_zone) {
        println!(
            "  WARNING: above red zone ({:.0}% > {:.0}%)",
            status.utilization() * 100.0,
            config.red_zone * 100.0
        );
    }
    if !ring.is_owner_alive() {
        println!("  WARNING: owner {} is gone; use 'remove' to clean up", status.owner_pid);
    }
    ring.close()
}

fn handle_remove(global: &ArgMatches, sub: &ArgMatches, config: &PipelineConfig) -> Result<()> {
    let name: String = required_arg(sub, "ring")?;
    let ring_config = ring_config(global, sub, config, &name)?;

    // an unreadable header is as stale as a dead owner
    if let Ok(ring) = RingBuffer::attach(ring_config.clone()) {
        let owner = ring.owner_pid();
        let alive = ring.is_owner_alive();
        ring.close()?;
        if alive {
            return Err(EventRingError::invalid_parameter(
                "ring",
                format!("Ring {} is still owned by running process {}", name, owner),
            ));
        }
    }

    SharedSegment::remove_stale(&ring_config.segment_config())?;
    println!("Removed ring '{}'", name);
    Ok(())
}
