//! Reporting backends
//!
//! The controller calls a [`Reporter`] once per flush interval with the
//! summarized trackers of that interval and the controller's default tags.
//! How and where the data goes is up to the implementation; errors are
//! logged by the controller and dropped.

pub mod json;
pub mod log;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ReportError;
use crate::metrics::{ErrorKey, LatencyTracker, TrafficTracker};

pub use json::JsonLinesReporter;
pub use log::LogReporter;
pub use memory::MemoryReporter;

/// Occurrences of each distinct error within one interval.
pub type ErrorCounts = BTreeMap<ErrorKey, u64>;

/// Key/value labels attached to every reported record (e.g. `app=edge`).
pub type Tags = BTreeMap<String, String>;

/// Destination for summarized statistics.
///
/// Only called with non-empty batches. `tags` are the controller's default
/// tags at the time the interval was closed, possibly empty.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Name used when logging delivery failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn report_error(&self, counts: &ErrorCounts, tags: &Tags) -> Result<(), ReportError>;

    async fn report_latency(
        &self,
        trackers: &[LatencyTracker],
        tags: &Tags,
    ) -> Result<(), ReportError>;

    async fn report_traffic(
        &self,
        trackers: &[TrafficTracker],
        tags: &Tags,
    ) -> Result<(), ReportError>;
}
