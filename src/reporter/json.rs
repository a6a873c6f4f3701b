use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{ErrorCounts, Reporter, Tags};
use crate::error::ReportError;
use crate::metrics::{ErrorKey, LatencyTracker, TrafficTracker};

/// Writes one JSON object per line to any async writer (file, socket, pipe).
///
/// ```json
/// {"at":"2025-06-19T00:00:00Z","kind":"traffic","tags":{"app":"edge"},"id":"10.0.0.7:443","total_in":512,...}
/// ```
pub struct JsonLinesReporter<W> {
    writer: Mutex<W>,
}

/// One output line: timestamp, kind and default tags in front of the record fields.
#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    at: DateTime<Utc>,
    kind: &'static str,
    tags: &'a Tags,
    #[serde(flatten)]
    record: &'a T,
}

#[derive(Serialize)]
struct ErrorRecord<'a> {
    #[serde(flatten)]
    key: &'a ErrorKey,
    count: u64,
}

impl<W> JsonLinesReporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Give back the writer, e.g. to inspect a buffer in tests.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn write_lines<'a, T, I>(
        &self,
        kind: &'static str,
        tags: &Tags,
        records: I,
    ) -> Result<(), ReportError>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let at = Utc::now();
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(
                &mut buf,
                &Line {
                    at,
                    kind,
                    tags,
                    record,
                },
            )?;
            buf.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> Reporter for JsonLinesReporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn report_error(&self, counts: &ErrorCounts, tags: &Tags) -> Result<(), ReportError> {
        let records: Vec<ErrorRecord<'_>> = counts
            .iter()
            .map(|(key, &count)| ErrorRecord { key, count })
            .collect();
        self.write_lines("errors", tags, &records).await
    }

    async fn report_latency(
        &self,
        trackers: &[LatencyTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        self.write_lines("latency", tags, trackers).await
    }

    async fn report_traffic(
        &self,
        trackers: &[TrafficTracker],
        tags: &Tags,
    ) -> Result<(), ReportError> {
        self.write_lines("traffic", tags, trackers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Phase;
    use std::time::Duration;

    fn lines(reporter: JsonLinesReporter<Vec<u8>>) -> Vec<serde_json::Value> {
        let out = String::from_utf8(reporter.into_inner()).unwrap();
        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn traffic_lines_carry_kind_and_fields() {
        let reporter = JsonLinesReporter::new(Vec::new());
        let tracker = TrafficTracker::from_samples("10.0.0.7:443", &[(10, 1), (20, 2)]).unwrap();
        reporter.report_traffic(&[tracker], &Tags::new()).await.unwrap();

        let lines = lines(reporter);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "traffic");
        assert_eq!(lines[0]["tags"], serde_json::json!({}));
        assert_eq!(lines[0]["id"], "10.0.0.7:443");
        assert_eq!(lines[0]["total_in"], 30);
        assert_eq!(lines[0]["last_out"], 2);
        assert!(lines[0]["at"].is_string());
    }

    #[tokio::test]
    async fn error_lines_flatten_the_key() {
        let reporter = JsonLinesReporter::new(Vec::new());
        let mut counts = ErrorCounts::new();
        counts.insert(
            ErrorKey {
                identity: "db:5432".into(),
                message: "connection refused".into(),
                phase: Phase::Dial,
            },
            2,
        );
        reporter.report_error(&counts, &Tags::new()).await.unwrap();

        let lines = lines(reporter);
        assert_eq!(lines[0]["kind"], "errors");
        assert_eq!(lines[0]["identity"], "db:5432");
        assert_eq!(lines[0]["phase"], "dial");
        assert_eq!(lines[0]["message"], "connection refused");
        assert_eq!(lines[0]["count"], 2);
    }

    #[tokio::test]
    async fn one_line_per_tracker() {
        let reporter = JsonLinesReporter::new(Vec::new());
        let trackers: Vec<LatencyTracker> = ["a", "b", "c"]
            .iter()
            .map(|id| LatencyTracker::from_samples(*id, &[Duration::from_millis(3)]).unwrap())
            .collect();
        reporter.report_latency(&trackers, &Tags::new()).await.unwrap();
        assert_eq!(lines(reporter).len(), 3);
    }

    #[tokio::test]
    async fn default_tags_are_on_every_line() {
        let reporter = JsonLinesReporter::new(Vec::new());
        let tags = Tags::from([("app".to_owned(), "test-app".to_owned())]);
        let trackers: Vec<LatencyTracker> = ["a", "b"]
            .iter()
            .map(|id| LatencyTracker::from_samples(*id, &[Duration::from_millis(1)]).unwrap())
            .collect();
        reporter.report_latency(&trackers, &tags).await.unwrap();

        for line in lines(reporter) {
            assert_eq!(line["tags"]["app"], "test-app");
        }
    }
}
