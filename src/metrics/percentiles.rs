use std::time::Duration;

use serde::Serialize;

/// Latency breakdown for one identity over one reporting interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyTracker {
    pub id: String,
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
    /// Most recently submitted sample, not the largest
    pub last: Duration,
}

/// Traffic breakdown for one identity over one reporting interval.
/// `in` is bytes received by the instrumented side, `out` bytes sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficTracker {
    pub id: String,
    pub min_in: u64,
    pub max_in: u64,
    pub p95_in: u64,
    pub last_in: u64,
    pub total_in: u64,
    pub min_out: u64,
    pub max_out: u64,
    pub p95_out: u64,
    pub last_out: u64,
    pub total_out: u64,
}

/// min / max / p95 / last of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary<T> {
    pub min: T,
    pub max: T,
    pub p95: T,
    pub last: T,
}

/// Zero-based index of the 95th percentile in an ascending series of `n`.
/// `floor(0.95 * n)` in integer arithmetic, clamped to the last element.
pub fn p95_index(n: usize) -> usize {
    (n * 95 / 100).min(n.saturating_sub(1))
}

/// 95th percentile of an already sorted series.
pub fn percentile_95<T: Copy>(sorted: &[T]) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted[p95_index(sorted.len())])
}

/// Summarize a series given in submission order.
/// `last` is taken before sorting, so it stays the final submission.
pub fn summarize<T: Copy + Ord>(values: &[T]) -> Option<Summary<T>> {
    let last = *values.last()?;
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(Summary {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p95: percentile_95(&sorted)?,
        last,
    })
}

impl LatencyTracker {
    /// Returns `None` when no sample was observed in the interval.
    pub fn from_samples(id: impl Into<String>, samples: &[Duration]) -> Option<Self> {
        let s = summarize(samples)?;
        Some(Self {
            id: id.into(),
            min: s.min,
            max: s.max,
            p95: s.p95,
            last: s.last,
        })
    }
}

impl TrafficTracker {
    /// `samples` are `(bytes_in, bytes_out)` pairs in submission order.
    /// The two directions are sorted independently.
    pub fn from_samples(id: impl Into<String>, samples: &[(u64, u64)]) -> Option<Self> {
        let ins: Vec<u64> = samples.iter().map(|&(i, _)| i).collect();
        let outs: Vec<u64> = samples.iter().map(|&(_, o)| o).collect();
        let sin = summarize(&ins)?;
        let sout = summarize(&outs)?;

        Some(Self {
            id: id.into(),
            min_in: sin.min,
            max_in: sin.max,
            p95_in: sin.p95,
            last_in: sin.last,
            total_in: ins.iter().sum(),
            min_out: sout.min,
            max_out: sout.max,
            p95_out: sout.p95,
            last_out: sout.last,
            total_out: outs.iter().sum(),
        })
    }
}
