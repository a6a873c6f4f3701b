use async_trait::async_trait;
use tracing::info;

use super::{ErrorCounts, Reporter, Tags};
use crate::error::ReportError;
use crate::metrics::{LatencyTracker, TrafficTracker};

/// Emits every record as a structured `tracing` event at INFO level.
#[derive(Debug, Clone)]
pub struct LogReporter {
    name: String,
}

impl LogReporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl Reporter for LogReporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report_error(&self, counts: &ErrorCounts, tags: &Tags) -> Result<(), ReportError> {
        for (key, count) in counts {
            info!(
                reporter = %self.name,
                tags = ?tags,
                identity = %key.identity,
                phase = %key.phase,
                error = %key.message,
                count,
                "connection errors"
            );
        }
        Ok(())
    }

    async fn report_latency(
        &self,
        trackers: &[LatencyTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        for t in trackers {
            info!(
                reporter = %self.name,
                tags = ?tags,
                identity = %t.id,
                min_us = t.min.as_micros() as u64,
                max_us = t.max.as_micros() as u64,
                p95_us = t.p95.as_micros() as u64,
                last_us = t.last.as_micros() as u64,
                "latency"
            );
        }
        Ok(())
    }

    async fn report_traffic(
        &self,
        trackers: &[TrafficTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        for t in trackers {
            info!(
                reporter = %self.name,
                tags = ?tags,
                identity = %t.id,
                total_in = t.total_in,
                total_out = t.total_out,
                p95_in = t.p95_in,
                p95_out = t.p95_out,
                "traffic"
            );
        }
        Ok(())
    }
}
