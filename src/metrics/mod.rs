pub mod collector;
pub mod percentiles;
pub mod rate;

use std::fmt;
use std::io;
use std::time::Duration;

use serde::Serialize;

pub use collector::{Measured, DEFAULT_QUEUE_CAPACITY};
pub use percentiles::{LatencyTracker, TrafficTracker};
pub use rate::{RateSampler, RateStats};

/// Where in a connection's life an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Dial,
    Read,
    Write,
    Close,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::Read => "read",
            Self::Write => "write",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw observation submitted by instrumentation code.
/// Wrappers create these and push them into a [`Measured`] controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// A non-transient failure on a connection or dial attempt
    Error {
        identity: String,
        message: String,
        phase: Phase,
    },
    /// How long an operation (e.g. establishing a connection) took
    Latency { identity: String, duration: Duration },
    /// Bytes moved during one rate window
    Traffic {
        identity: String,
        bytes_in: u64,
        bytes_out: u64,
    },
}

impl Sample {
    /// Build an error sample with a normalized message for `err`.
    pub fn error(identity: impl Into<String>, err: &io::Error, phase: Phase) -> Self {
        Self::Error {
            identity: identity.into(),
            message: error_message(err),
            phase,
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            Self::Error { identity, .. }
            | Self::Latency { identity, .. }
            | Self::Traffic { identity, .. } => identity,
        }
    }
}

/// Grouping key for error occurrences within one reporting interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ErrorKey {
    pub identity: String,
    pub message: String,
    pub phase: Phase,
}

/// Short, stable description of an I/O error.
///
/// OS errors collapse to their kind ("connection refused") so that the same
/// condition groups under one key regardless of errno formatting. Anything
/// else keeps the last `:`-separated segment of its display text.
pub fn error_message(err: &io::Error) -> String {
    if err.raw_os_error().is_some() {
        return err.kind().to_string();
    }
    let text = err.to_string();
    let last = text.rsplit(':').next().unwrap_or_default().trim();
    if last.is_empty() {
        err.kind().to_string()
    } else {
        last.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_errors_use_kind_description() {
        let err = io::Error::from_raw_os_error(111);
        // ECONNREFUSED on Linux
        if err.kind() == io::ErrorKind::ConnectionRefused {
            assert_eq!(error_message(&err), "connection refused");
        }
    }

    #[test]
    fn custom_errors_keep_last_segment() {
        let err = io::Error::new(io::ErrorKind::Other, "dial tcp 10.0.0.1:80: no route");
        assert_eq!(error_message(&err), "no route");
    }

    #[test]
    fn empty_trailing_segment_falls_back_to_kind() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "write failed:");
        assert_eq!(error_message(&err), "broken pipe");
    }

    #[test]
    fn identity_is_shared_across_variants() {
        let sample = Sample::Traffic {
            identity: "10.0.0.1:443".into(),
            bytes_in: 1,
            bytes_out: 2,
        };
        assert_eq!(sample.identity(), "10.0.0.1:443");

        let sample = Sample::error(
            "db",
            &io::Error::new(io::ErrorKind::Other, "boom"),
            Phase::Write,
        );
        assert_eq!(
            sample,
            Sample::Error {
                identity: "db".into(),
                message: "boom".into(),
                phase: Phase::Write,
            }
        );
    }
}
