use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::net::ConnOptions;
use crate::reporter::Tags;

const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Tunables for a controller and the connections it observes.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeasuredConfig {
    /// How often buffered samples are summarized and handed to reporters
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Length of one throughput window on each connection
    #[serde(default = "default_rate_interval_ms")]
    pub rate_interval_ms: u64,

    /// Samples buffered between connections and the controller before drops
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Fixed identity for every wrapped connection instead of its address
    #[serde(default)]
    pub identity: Option<String>,

    /// Tags attached to every reported record, e.g. `{"app": "edge"}`
    #[serde(default)]
    pub default_tags: Tags,
}

fn default_flush_interval_ms() -> u64 {
    10_000
}
fn default_rate_interval_ms() -> u64 {
    1_000
}
fn default_queue_capacity() -> usize {
    crate::metrics::DEFAULT_QUEUE_CAPACITY
}

impl Default for MeasuredConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            rate_interval_ms: default_rate_interval_ms(),
            queue_capacity: default_queue_capacity(),
            identity: None,
            default_tags: Tags::new(),
        }
    }
}

impl MeasuredConfig {
    /// Parse JSON and validate the result.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 || self.flush_interval_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::FlushInterval {
                got: self.flush_interval_ms,
                max: MAX_INTERVAL_MS,
            });
        }
        if self.rate_interval_ms == 0 || self.rate_interval_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::RateInterval {
                got: self.rate_interval_ms,
                max: MAX_INTERVAL_MS,
            });
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::QueueCapacity {
                got: self.queue_capacity,
                max: MAX_QUEUE_CAPACITY,
            });
        }
        if matches!(&self.identity, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::EmptyIdentity);
        }
        if self.default_tags.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::EmptyTagKey);
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    /// Per-connection options derived from this configuration.
    pub fn conn_options(&self) -> ConnOptions {
        let opts = ConnOptions::new(self.rate_interval());
        match &self.identity {
            Some(id) => opts.with_identity(id.clone()),
            None => opts,
        }
    }
}
