//! Bounded sleep-and-retry for full/empty channels

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{EventRingError, Result},
    pipeline::ShutdownSignal,
};

/// How a Tx/Rx waits on a full or empty channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// First sleep after a failed attempt
    #[serde(with = "crate::config::millis")]
    pub initial_backoff: Duration,
    /// Sleeps double up to this value
    #[serde(with = "crate::config::millis")]
    pub max_backoff: Duration,
    /// Give up after waiting this long for one transfer; `None` waits forever
    /// and is written as `0` in config files
    #[serde(with = "crate::config::millis_opt")]
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(EventRingError::invalid_parameter(
                "initial_backoff",
                "Backoff must be greater than 0",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(EventRingError::invalid_parameter(
                "max_backoff",
                "Maximum backoff must not be below the initial backoff",
            ));
        }
        Ok(())
    }

    /// Start waiting for one transfer
    pub fn start<'a>(&'a self, shutdown: &'a ShutdownSignal) -> Backoff<'a> {
        Backoff {
            policy: self,
            shutdown,
            started: Instant::now(),
            delay: self.initial_backoff,
            attempts: 0,
        }
    }
}

/// State of one retry sequence
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    shutdown: &'a ShutdownSignal,
    started: Instant,
    delay: Duration,
    attempts: u32,
}

impl Backoff<'_> {
    /// Sleep before the next attempt.
    ///
    /// Fails with `Shutdown` when shutdown was requested and with `Timeout`
    /// once the policy timeout has passed.
    pub fn wait(&mut self, operation: &str) -> Result<()> {
        self.shutdown.check()?;

        let elapsed = self.started.elapsed();
        let mut sleep = self.delay;
        if let Some(timeout) = self.policy.timeout {
            if elapsed >= timeout {
                return Err(EventRingError::timeout(operation, elapsed));
            }
            sleep = sleep.min(timeout - elapsed);
        }

        thread::sleep(sleep);
        self.delay = (self.delay * 2).min(self.policy.max_backoff);
        self.attempts += 1;
        Ok(())
    }

    /// Sleeps so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_times_out() {
        let policy = RetryPolicy::new()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
            .with_timeout(Some(Duration::from_millis(20)));
        let shutdown = ShutdownSignal::new();
        let mut backoff = policy.start(&shutdown);

        let err = loop {
            if let Err(e) = backoff.wait("test") {
                break e;
            }
        };
        assert!(matches!(err, EventRingError::Timeout { .. }));
        assert!(backoff.attempts() > 1);
        assert!(backoff.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_backoff_stops_on_shutdown() {
        let policy = RetryPolicy::new().with_timeout(None);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let mut backoff = policy.start(&shutdown);
        assert!(matches!(backoff.wait("test"), Err(EventRingError::Shutdown)));
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str("max_backoff = 200\ntimeout = 5000").unwrap();
        assert_eq!(policy.max_backoff, Duration::from_millis(200));
        assert_eq!(policy.timeout, Some(Duration::from_secs(5)));
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_unbounded_timeout_in_toml() {
        let policy: RetryPolicy = toml::from_str("timeout = 0").unwrap();
        assert_eq!(policy.timeout, None);

        let unbounded = RetryPolicy::new().with_timeout(None);
        let text = toml::to_string(&unbounded).unwrap();
        assert_eq!(toml::from_str::<RetryPolicy>(&text).unwrap(), unbounded);
    }
}
