use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use super::percentiles::{LatencyTracker, TrafficTracker};
use super::{ErrorKey, Sample};
use crate::config::MeasuredConfig;
use crate::reporter::{ErrorCounts, Reporter, Tags};

// ─── Configuration ───────────────────────────────────────────────

/// Samples buffered between instrumented connections and the run loop
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ─── Public types ────────────────────────────────────────────────

/// Aggregation controller.
///
/// Connections call `submit()`; a run loop started with `start()` buckets
/// samples per identity and, once per interval, hands summarized trackers to
/// every reporter along with the controller's default tags. Cloning yields
/// another handle to the same controller.
#[derive(Clone)]
pub struct Measured {
    shared: Arc<Shared>,
}

/// Everything one reporting interval produced, already summarized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalReport {
    pub tags: Tags,
    pub errors: ErrorCounts,
    pub latencies: Vec<LatencyTracker>,
    pub traffic: Vec<TrafficTracker>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Shared {
    tx: mpsc::Sender<Sample>,
    // Parked here while stopped, owned by the run loop while running
    rx: Mutex<Option<mpsc::Receiver<Sample>>>,
    run: Mutex<Option<RunHandle>>,
    dropped: AtomicU64,
    // Shared with the run loop, which must not keep `Shared` alive
    default_tags: Arc<RwLock<Tags>>,
}

struct RunHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<mpsc::Receiver<Sample>>,
}

/// Raw samples collected during one interval, in submission order per identity.
#[derive(Debug, Default)]
struct Buckets {
    errors: ErrorCounts,
    latencies: BTreeMap<String, Vec<Duration>>,
    traffic: BTreeMap<String, Vec<(u64, u64)>>,
}

// ─── Measured impl ───────────────────────────────────────────────

impl Measured {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// A controller whose queue holds at most `capacity` pending samples.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                tx,
                rx: Mutex::new(Some(rx)),
                run: Mutex::new(None),
                dropped: AtomicU64::new(0),
                default_tags: Arc::default(),
            }),
        }
    }

    pub fn from_config(config: &MeasuredConfig) -> Self {
        Self::with_capacity(config.queue_capacity).with_default_tags(config.default_tags.clone())
    }

    /// Builder form of [`set_default_tags`](Self::set_default_tags).
    pub fn with_default_tags(self, tags: Tags) -> Self {
        self.set_default_tags(tags);
        self
    }

    /// Replace the tags attached to every report, from the next flush on.
    pub fn set_default_tags(&self, tags: Tags) {
        *self.shared.default_tags.write() = tags;
    }

    pub fn default_tags(&self) -> Tags {
        self.shared.default_tags.read().clone()
    }

    /// Launch the run loop, flushing every `interval` to `reporters`.
    ///
    /// Ignored while already running; stop first to change reporters or
    /// the interval. Samples submitted while stopped are kept (up to the
    /// queue capacity) and go into the first interval after this call.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration, reporters: Vec<Arc<dyn Reporter>>) {
        let mut run = self.shared.run.lock();
        if run.is_some() {
            warn!("measured loop already running, ignoring start");
            return;
        }
        let Some(rx) = self.shared.rx.lock().take() else {
            error!("sample queue receiver lost, cannot start measured loop");
            return;
        };

        let interval = interval.max(Duration::from_millis(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            rx,
            stop_rx,
            interval,
            reporters.into(),
            self.shared.default_tags.clone(),
        ));
        *run = Some(RunHandle {
            stop: stop_tx,
            task,
        });
    }

    /// Stop the run loop and wait for it to exit.
    ///
    /// Samples already queued are flushed to the reporters one last time.
    /// Does nothing when the controller is not running.
    pub async fn stop(&self) {
        let Some(handle) = self.shared.run.lock().take() else {
            return;
        };
        debug!("stopping measured loop...");
        let _ = handle.stop.send(());
        match handle.task.await {
            Ok(rx) => *self.shared.rx.lock() = Some(rx),
            Err(e) => error!(error = %e, "measured loop terminated abnormally"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.lock().is_some()
    }

    /// Enqueue a sample without ever waiting.
    ///
    /// When the queue is full the sample is dropped and counted; losing a
    /// data point is preferred over stalling the caller's I/O.
    pub fn submit(&self, sample: Sample) {
        match self.shared.tx.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(sample)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(identity = sample.identity(), dropped, "sample queue full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(sample)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(identity = sample.identity(), "sample queue closed, dropping sample");
            }
        }
    }

    /// Samples rejected so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Measured {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Measured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measured")
            .field("running", &self.is_running())
            .field("dropped", &self.dropped())
            .finish()
    }
}

// ─── Run loop ────────────────────────────────────────────────────

async fn run_loop(
    mut rx: mpsc::Receiver<Sample>,
    mut stop: oneshot::Receiver<()>,
    interval: Duration,
    reporters: Arc<[Arc<dyn Reporter>]>,
    default_tags: Arc<RwLock<Tags>>,
) -> mpsc::Receiver<Sample> {
    debug!(interval_ms = interval.as_millis() as u64, "measured loop started");

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buckets = Buckets::default();

    loop {
        tokio::select! {
            biased;
            // Also fires if every controller handle was dropped
            _ = &mut stop => break,
            Some(sample) = rx.recv() => buckets.push(sample),
            _ = ticker.tick() => {
                let batch = std::mem::take(&mut buckets);
                if !batch.is_empty() {
                    let report = batch.summarize(default_tags.read().clone());
                    tokio::spawn(dispatch(report, reporters.clone()));
                }
            }
        }
    }

    while let Ok(sample) = rx.try_recv() {
        buckets.push(sample);
    }
    if !buckets.is_empty() {
        let report = buckets.summarize(default_tags.read().clone());
        dispatch(report, reporters).await;
    }

    debug!("measured loop stopped");
    rx
}

/// Hand one interval to every reporter. A failing reporter is logged and
/// does not keep the others from receiving the batch.
async fn dispatch(report: IntervalReport, reporters: Arc<[Arc<dyn Reporter>]>) {
    for reporter in reporters.iter() {
        if !report.errors.is_empty() {
            if let Err(e) = reporter.report_error(&report.errors, &report.tags).await {
                warn!(reporter = reporter.name(), error = %e, "failed to report errors");
            }
        }
        if !report.latencies.is_empty() {
            if let Err(e) = reporter.report_latency(&report.latencies, &report.tags).await {
                warn!(reporter = reporter.name(), error = %e, "failed to report latency");
            }
        }
        if !report.traffic.is_empty() {
            if let Err(e) = reporter.report_traffic(&report.traffic, &report.tags).await {
                warn!(reporter = reporter.name(), error = %e, "failed to report traffic");
            }
        }
        trace!(reporter = reporter.name(), "interval dispatched");
    }
}

// ─── Buckets impl ────────────────────────────────────────────────

impl Buckets {
    fn push(&mut self, sample: Sample) {
        match sample {
            Sample::Error {
                identity,
                message,
                phase,
            } => {
                *self
                    .errors
                    .entry(ErrorKey {
                        identity,
                        message,
                        phase,
                    })
                    .or_insert(0) += 1;
            }
            Sample::Latency { identity, duration } => {
                self.latencies.entry(identity).or_default().push(duration);
            }
            Sample::Traffic {
                identity,
                bytes_in,
                bytes_out,
            } => {
                self.traffic
                    .entry(identity)
                    .or_default()
                    .push((bytes_in, bytes_out));
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.latencies.is_empty() && self.traffic.is_empty()
    }

    fn summarize(self, tags: Tags) -> IntervalReport {
        IntervalReport {
            tags,
            errors: self.errors,
            latencies: self
                .latencies
                .into_iter()
                .filter_map(|(id, samples)| LatencyTracker::from_samples(id, &samples))
                .collect(),
            traffic: self
                .traffic
                .into_iter()
                .filter_map(|(id, samples)| TrafficTracker::from_samples(id, &samples))
                .collect(),
        }
    }
}
