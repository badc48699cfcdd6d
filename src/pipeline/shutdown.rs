//! Cooperative shutdown flag, optionally driven by SIGINT/SIGTERM

use std::{
    os::raw::c_int,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::info;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{EventRingError, Result};

/// Set from the signal handler; only async-signal-safe work happens there
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Shared flag checked between retries and between events
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    watch_signals: bool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGTERM handlers and return a signal that observes them
    pub fn from_process_signals() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only stores into an atomic
            unsafe { sigaction(signal, &action) }.map_err(|e| {
                EventRingError::resource(format!("Failed to install {} handler: {}", signal, e))
            })?;
        }
        info!("installed SIGINT/SIGTERM shutdown handlers");

        Ok(Self {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        })
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.watch_signals && SIGNAL_RECEIVED.load(Ordering::SeqCst))
    }

    /// `Err(Shutdown)` once shutdown was requested
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(EventRingError::Shutdown)
        } else {
            Ok(())
        }
    }
}
