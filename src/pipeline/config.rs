//! Pipeline configuration, loadable from TOML

use std::{collections::HashSet, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_RED_ZONE,
    error::{EventRingError, Result},
    message::HandlerConfig,
    ring::RingConfig,
    transport::{RetryPolicy, TcpConfig},
};

/// Everything a pipeline process needs to open its channels.
///
/// ```toml
/// red_zone = 0.75
///
/// [[rings]]
/// name = "raw"
/// capacity_words = 262144
///
/// [handler]
/// checksum = "xor32"
/// compression = "lz4"
/// skip_empty_arrays = true
///
/// [retry]
/// timeout = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring channels known to this process
    pub rings: Vec<RingConfig>,
    /// Serialization settings shared by every Tx/Rx
    pub handler: HandlerConfig,
    /// Full/empty retry policy shared by every Tx/Rx
    pub retry: RetryPolicy,
    pub tcp: TcpConfig,
    /// Occupancy fraction above which ring sinks report congestion
    pub red_zone: f64,
    /// Producer id stamped into message headers; defaults to the process id
    pub source_id: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rings: Vec::new(),
            handler: HandlerConfig::default(),
            retry: RetryPolicy::default(),
            tcp: TcpConfig::default(),
            red_zone: DEFAULT_RED_ZONE,
            source_id: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ring channel
    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.rings.push(ring);
        self
    }

    pub fn with_handler(mut self, handler: HandlerConfig) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    pub fn with_red_zone(mut self, fraction: f64) -> Self {
        self.red_zone = fraction;
        self
    }

    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| {
            EventRingError::invalid_parameter("config", format!("Invalid TOML: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            EventRingError::from_io(e, &format!("Failed to read {}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| {
            EventRingError::invalid_parameter("config", format!("Cannot render TOML: {}", e))
        })
    }

    /// Look up a ring channel by name
    pub fn ring(&self, name: &str) -> Option<&RingConfig> {
        self.rings.iter().find(|ring| ring.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for ring in &self.rings {
            ring.validate()?;
            if !names.insert(ring.name.as_str()) {
                return Err(EventRingError::invalid_parameter(
                    "rings",
                    format!("Ring {} is configured twice", ring.name),
                ));
            }
        }

        self.handler.validate()?;
        self.retry.validate()?;
        self.tcp.validate()?;

        if !(self.red_zone > 0.0 && self.red_zone <= 1.0) {
            return Err(EventRingError::invalid_parameter(
                "red_zone",
                "Red zone must be in (0, 1]",
            ));
        }

        Ok(())
    }
}
