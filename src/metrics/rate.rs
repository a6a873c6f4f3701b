use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Shortest window we divide by; guards against a zero-length final window.
const MIN_WINDOW: Duration = Duration::from_micros(1);

/// Throughput statistic for one direction of a connection.
///
/// The I/O path calls `begin()` / `advance()` and only touches atomics.
/// A periodic task calls `recompute()` to close a window and fold its
/// throughput into the running min / max / average.
#[derive(Debug)]
pub struct RateSampler {
    epoch: Instant,
    total: AtomicU64,
    in_window: AtomicU64,
    // Nanoseconds since `epoch`, offset by one so zero means "unset"
    first_activity: AtomicU64,
    last_activity: AtomicU64,
    window: Mutex<Window>,
}

/// Point-in-time view of a sampler. Rates are bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateStats {
    pub total: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Number of windows that carried traffic
    pub windows: u64,
    /// Time between the first started and the last completed operation
    pub active: Duration,
}

/// Running totals across completed windows.
#[derive(Debug)]
struct Window {
    started: Instant,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Window {
    fn fold(&mut self, rate: f64) {
        if self.count == 0 {
            self.min = rate;
            self.max = rate;
        } else {
            self.min = self.min.min(rate);
            self.max = self.max.max(rate);
        }
        self.sum += rate;
        self.count += 1;
    }
}

impl RateSampler {
    pub fn new(now: Instant) -> Self {
        Self {
            epoch: now,
            total: AtomicU64::new(0),
            in_window: AtomicU64::new(0),
            first_activity: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            window: Mutex::new(Window {
                started: now,
                count: 0,
                min: 0.0,
                max: 0.0,
                sum: 0.0,
            }),
        }
    }

    /// Mark the start of an I/O operation.
    pub fn begin(&self, now: Instant) {
        let mark = self.mark(now);
        let _ = self
            .first_activity
            .compare_exchange(0, mark, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Record `n` bytes completed at `now`.
    pub fn advance(&self, n: u64, now: Instant) {
        if n == 0 {
            return;
        }
        self.total.fetch_add(n, Ordering::Relaxed);
        self.in_window.fetch_add(n, Ordering::AcqRel);
        self.last_activity.fetch_max(self.mark(now), Ordering::Relaxed);
    }

    /// Close the current window and return the bytes it carried.
    ///
    /// Windows without traffic are not folded into the statistic, so idle
    /// stretches do not pull the minimum down to zero.
    pub fn recompute(&self, now: Instant) -> u64 {
        let mut w = self.window.lock();
        let bytes = self.in_window.swap(0, Ordering::AcqRel);
        let elapsed = now.saturating_duration_since(w.started).max(MIN_WINDOW);
        w.started = now;

        if bytes > 0 {
            w.fold(bytes as f64 / elapsed.as_secs_f64());
        }
        bytes
    }

    /// Lifetime byte count.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RateStats {
        let (count, min, max, sum) = {
            let w = self.window.lock();
            (w.count, w.min, w.max, w.sum)
        };

        let first = self.first_activity.load(Ordering::Relaxed);
        let last = self.last_activity.load(Ordering::Relaxed);
        let active = if first == 0 || last < first {
            Duration::ZERO
        } else {
            Duration::from_nanos(last - first)
        };

        RateStats {
            total: self.total(),
            min,
            max,
            avg: if count > 0 { sum / count as f64 } else { 0.0 },
            windows: count,
            active,
        }
    }

    fn mark(&self, now: Instant) -> u64 {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX - 1) + 1
    }
}
