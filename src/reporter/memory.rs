use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ErrorCounts, Reporter, Tags};
use crate::error::ReportError;
use crate::metrics::{ErrorKey, LatencyTracker, TrafficTracker};

/// Keeps every reported record in memory, in delivery order.
///
/// Useful for tests and for applications that poll their own statistics
/// instead of shipping them somewhere.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
struct Recorded {
    errors: Vec<(ErrorKey, u64)>,
    latencies: Vec<LatencyTracker>,
    traffic: Vec<TrafficTracker>,
    tags: Tags,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every error entry reported so far, one per key per interval.
    pub fn errors(&self) -> Vec<(ErrorKey, u64)> {
        self.inner.lock().errors.clone()
    }

    /// Sum of all reported error counts.
    pub fn error_total(&self) -> u64 {
        self.inner.lock().errors.iter().map(|(_, n)| n).sum()
    }

    pub fn latencies(&self) -> Vec<LatencyTracker> {
        self.inner.lock().latencies.clone()
    }

    pub fn traffic(&self) -> Vec<TrafficTracker> {
        self.inner.lock().traffic.clone()
    }

    /// Traffic trackers for one identity across all intervals.
    pub fn traffic_for(&self, identity: &str) -> Vec<TrafficTracker> {
        self.inner
            .lock()
            .traffic
            .iter()
            .filter(|t| t.id == identity)
            .cloned()
            .collect()
    }

    /// Tags that came with the most recent delivery.
    pub fn tags(&self) -> Tags {
        self.inner.lock().tags.clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        *self.inner.lock() = Recorded::default();
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn report_error(&self, counts: &ErrorCounts, tags: &Tags) -> Result<(), ReportError> {
        let mut inner = self.inner.lock();
        inner
            .errors
            .extend(counts.iter().map(|(k, v)| (k.clone(), *v)));
        inner.tags.clone_from(tags);
        Ok(())
    }

    async fn report_latency(
        &self,
        trackers: &[LatencyTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        let mut inner = self.inner.lock();
        inner.latencies.extend_from_slice(trackers);
        inner.tags.clone_from(tags);
        Ok(())
    }

    async fn report_traffic(
        &self,
        trackers: &[TrafficTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        let mut inner = self.inner.lock();
        inner.traffic.extend_from_slice(trackers);
        inner.tags.clone_from(tags);
        Ok(())
    }
}
