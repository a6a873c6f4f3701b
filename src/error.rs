//! Error types shared across the crate
//!
//! I/O paths return `std::io::Result` untouched; these types cover the
//! configuration surface and reporter delivery.

use thiserror::Error;

/// Invalid or unparsable [`MeasuredConfig`](crate::config::MeasuredConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("flush_interval_ms must be between 1 and {max}, got {got}")]
    FlushInterval { got: u64, max: u64 },

    #[error("rate_interval_ms must be between 1 and {max}, got {got}")]
    RateInterval { got: u64, max: u64 },

    #[error("queue_capacity must be between 1 and {max}, got {got}")]
    QueueCapacity { got: usize, max: usize },

    #[error("identity override must not be empty")]
    EmptyIdentity,

    #[error("default tag keys must not be empty")]
    EmptyTagKey,

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// A reporter failed to deliver a batch.
///
/// Delivery failures are logged by the controller and never reach the
/// instrumented connection.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rejected by backend: {0}")]
    Rejected(String),
}
