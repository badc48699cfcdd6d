//! Runs a stage to completion

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::{EventRingError, Result};

use super::{
    shutdown::ShutdownSignal,
    stage::{PipelineStage, StepOutcome},
};

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub stage: String,
    pub events: u64,
    pub elapsed: Duration,
    /// Stopped by the shutdown signal rather than by the end of the stream
    pub interrupted: bool,
}

impl DriverReport {
    pub fn events_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }
}

/// Calls `start`, then `step` until the stream ends or shutdown is requested,
/// then `stop`. `stop` runs on every path, errors included.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    shutdown: ShutdownSignal,
    max_events: Option<u64>,
}

impl Driver {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            max_events: None,
        }
    }

    /// Stop after this many events
    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = Some(max_events);
        self
    }

    pub fn run<P: PipelineStage + ?Sized>(&self, stage: &mut P) -> Result<DriverReport> {
        let started = Instant::now();
        let outcome = self.drive(stage);
        let stopped = stage.stop();

        let report = DriverReport {
            stage: stage.name().to_string(),
            events: stage.events(),
            elapsed: started.elapsed(),
            interrupted: matches!(outcome, Ok(true)),
        };

        match (outcome, stopped) {
            (Ok(_), Ok(())) => {
                info!(
                    "stage {} done: {} events in {:?}{}",
                    report.stage,
                    report.events,
                    report.elapsed,
                    if report.interrupted { " (interrupted)" } else { "" }
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), stopped) => {
                if let Err(stop_error) = stopped {
                    warn!("stage {} failed to stop cleanly: {}", report.stage, stop_error);
                }
                Err(e)
            }
        }
    }

    /// Returns whether the run was interrupted
    fn drive<P: PipelineStage + ?Sized>(&self, stage: &mut P) -> Result<bool> {
        self.shutdown.check()?;
        stage.start()?;
        loop {
            if self.shutdown.is_triggered() {
                info!("stage {}: shutdown requested", stage.name());
                return Ok(true);
            }
            if self.max_events.map_or(false, |max| stage.events() >= max) {
                return Ok(false);
            }
            match stage.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Finished) => return Ok(false),
                Err(EventRingError::Shutdown) => {
                    info!("stage {}: interrupted while waiting", stage.name());
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
