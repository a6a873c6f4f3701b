//! Measured connection wrapper
//!
//! [`MeasuredConn`] forwards every read and write to the wrapped stream and
//! records what happened: byte counts go into one [`RateSampler`] per
//! direction, unexpected errors into a write-once slot and the controller's
//! sample queue. A background task closes a rate window every interval and
//! reports the traffic of that window.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::{ConnOptions, FinishCallback};
use crate::metrics::{error_message, Measured, Phase, RateSampler, Sample};

/// Lifetime statistics of one connection. Rates are bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub sent_total: u64,
    pub sent_min: f64,
    pub sent_max: f64,
    pub sent_avg: f64,
    pub recv_total: u64,
    pub recv_min: f64,
    pub recv_max: f64,
    pub recv_avg: f64,
    /// Time from wrapping until the final report (or until now while open)
    pub duration: Duration,
}

/// The first unexpected error a connection ran into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{phase} failed: {message}")]
pub struct ConnError {
    pub kind: io::ErrorKind,
    pub message: String,
    pub phase: Phase,
}

/// State shared between a connection, its tracking task and finish callbacks.
pub struct ConnMetrics {
    identity: String,
    opened: Instant,
    finished: Mutex<Option<Instant>>,
    sent: RateSampler,
    recv: RateSampler,
    first_error: Mutex<Option<ConnError>>,
    measured: Measured,
}

impl ConnMetrics {
    fn new(identity: String, measured: Measured) -> Self {
        let now = Instant::now();
        Self {
            identity,
            opened: now,
            finished: Mutex::new(None),
            sent: RateSampler::new(now),
            recv: RateSampler::new(now),
            first_error: Mutex::new(None),
            measured,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn stats(&self) -> Stats {
        let sent = self.sent.stats();
        let recv = self.recv.stats();
        let end = self.finished.lock().unwrap_or_else(Instant::now);

        Stats {
            sent_total: sent.total,
            sent_min: sent.min,
            sent_max: sent.max,
            sent_avg: sent.avg,
            recv_total: recv.total,
            recv_min: recv.min,
            recv_max: recv.max,
            recv_avg: recv.avg,
            duration: end.saturating_duration_since(self.opened),
        }
    }

    pub fn first_error(&self) -> Option<ConnError> {
        self.first_error.lock().clone()
    }

    /// True once the final report has been made.
    pub fn is_finished(&self) -> bool {
        self.finished.lock().is_some()
    }

    pub fn sent(&self) -> &RateSampler {
        &self.sent
    }

    pub fn received(&self) -> &RateSampler {
        &self.recv
    }

    fn observe_error(&self, err: &io::Error, phase: Phase) {
        if is_transient(err, phase) {
            trace!(identity = %self.identity, %phase, error = %err, "ignoring transient error");
            return;
        }

        {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(ConnError {
                    kind: err.kind(),
                    message: error_message(err),
                    phase,
                });
            }
        }
        self.measured
            .submit(Sample::error(self.identity.clone(), err, phase));
    }

    /// Close both rate windows and report their traffic, if any.
    fn flush(&self, now: Instant) {
        let bytes_out = self.sent.recompute(now);
        let bytes_in = self.recv.recompute(now);
        if bytes_in == 0 && bytes_out == 0 {
            return;
        }
        self.measured.submit(Sample::Traffic {
            identity: self.identity.clone(),
            bytes_in,
            bytes_out,
        });
    }
}

impl std::fmt::Debug for ConnMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnMetrics")
            .field("identity", &self.identity)
            .field("stats", &self.stats())
            .field("first_error", &self.first_error())
            .finish()
    }
}

/// Timeouts and end-of-stream are part of normal operation (idle keep-alives,
/// read deadlines, peers hanging up) and never count as failures.
pub(crate) fn is_transient(err: &io::Error, phase: Phase) -> bool {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => true,
        io::ErrorKind::UnexpectedEof => phase == Phase::Read,
        io::ErrorKind::NotConnected => phase == Phase::Close,
        _ => false,
    }
}

/// A stream whose traffic and failures are being measured.
///
/// Must be created inside a Tokio runtime; it spawns the task that reports
/// the connection periodically. Dropping the wrapper without `close()` still
/// ends that task with a final report, just without waiting for it.
///
/// `close()` releases the underlying stream. Reads and writes after that
/// fail with [`io::ErrorKind::NotConnected`] and leave the statistics as
/// they were at the final report.
pub struct MeasuredConn<S> {
    // None once closed
    stream: Option<S>,
    metrics: Arc<ConnMetrics>,
    // Taken by the first close(); its absence makes close() a no-op
    shutdown: Option<oneshot::Sender<()>>,
    tracker: Option<JoinHandle<()>>,
}

impl<S> MeasuredConn<S> {
    /// Start measuring `stream`. An identity override in `opts` takes
    /// precedence over `identity`.
    pub fn new(
        stream: S,
        identity: impl Into<String>,
        measured: &Measured,
        opts: &ConnOptions,
    ) -> Self {
        let identity = opts.identity_or(|| identity.into());
        let metrics = Arc::new(ConnMetrics::new(identity, measured.clone()));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let tracker = tokio::spawn(track(
            metrics.clone(),
            opts.interval(),
            shutdown_rx,
            opts.on_finish.clone(),
        ));
        debug!(identity = %metrics.identity, "tracking connection");

        Self {
            stream: Some(stream),
            metrics,
            shutdown: Some(shutdown),
            tracker: Some(tracker),
        }
    }

    pub fn identity(&self) -> &str {
        self.metrics.identity()
    }

    pub fn stats(&self) -> Stats {
        self.metrics.stats()
    }

    pub fn first_error(&self) -> Option<ConnError> {
        self.metrics.first_error()
    }

    /// Shared handle that outlives the wrapper.
    pub fn metrics(&self) -> Arc<ConnMetrics> {
        self.metrics.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// The wrapped stream, `None` after `close()`.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Bytes moved through this reference bypass the counters.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    /// Unwrap the stream; tracking ends with a final report in the background.
    pub fn into_inner(self) -> Option<S> {
        self.stream
    }
}

/// Pin the stream of an open connection.
fn pinned<S: Unpin>(stream: &mut Option<S>) -> io::Result<Pin<&mut S>> {
    match stream.as_mut() {
        Some(stream) => Ok(Pin::new(stream)),
        None => Err(closed()),
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

impl<S: AsyncWrite + Unpin> MeasuredConn<S> {
    /// Shut the stream down, release it and wait for the final report.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    /// The stream's own shutdown result is returned unchanged.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        let result = match self.stream.as_mut() {
            Some(stream) => stream.shutdown().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            self.metrics.observe_error(e, Phase::Close);
        }
        // Dropped before the final report so no byte escapes it
        self.stream = None;

        let _ = shutdown.send(());
        if let Some(tracker) = self.tracker.take() {
            if let Err(e) = tracker.await {
                warn!(identity = %self.metrics.identity, error = %e, "connection tracker failed");
            }
        }
        result
    }
}

impl<S> std::fmt::Debug for MeasuredConn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasuredConn")
            .field("metrics", &self.metrics)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Periodic reporting for one connection; ends on close or drop.
async fn track(
    metrics: Arc<ConnMetrics>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
    on_finish: Option<FinishCallback>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Err means the wrapper was dropped; that ends tracking too
            _ = &mut shutdown => break,
            _ = ticker.tick() => metrics.flush(Instant::now()),
        }
    }

    let now = Instant::now();
    metrics.flush(now);
    *metrics.finished.lock() = Some(now);

    let stats = metrics.stats();
    debug!(
        identity = %metrics.identity,
        sent = stats.sent_total,
        received = stats.recv_total,
        duration_ms = stats.duration.as_millis() as u64,
        "connection finished"
    );

    if let Some(on_finish) = on_finish {
        on_finish(&metrics);
    }
}

// ─── tokio I/O forwarding ────────────────────────────────────────

impl<S: AsyncRead + Unpin> AsyncRead for MeasuredConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let stream = pinned(&mut this.stream)?;
        this.metrics.recv.begin(Instant::now());

        let before = buf.filled().len();
        let result = ready!(stream.poll_read(cx, buf));
        let n = buf.filled().len().saturating_sub(before);
        this.metrics.recv.advance(n as u64, Instant::now());

        if let Err(e) = &result {
            this.metrics.observe_error(e, Phase::Read);
        }
        Poll::Ready(result)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeasuredConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let stream = pinned(&mut this.stream)?;
        this.metrics.sent.begin(Instant::now());

        let result = ready!(stream.poll_write(cx, buf));
        this.record_write(&result);
        Poll::Ready(result)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let stream = pinned(&mut this.stream)?;
        this.metrics.sent.begin(Instant::now());

        let result = ready!(stream.poll_write_vectored(cx, bufs));
        this.record_write(&result);
        Poll::Ready(result)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_write_vectored())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = ready!(pinned(&mut this.stream)?.poll_flush(cx));
        if let Err(e) = &result {
            this.metrics.observe_error(e, Phase::Write);
        }
        Poll::Ready(result)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(stream).poll_shutdown(cx));
        if let Err(e) = &result {
            this.metrics.observe_error(e, Phase::Close);
        }
        Poll::Ready(result)
    }
}

impl<S> MeasuredConn<S> {
    fn record_write(&self, result: &io::Result<usize>) {
        match result {
            Ok(n) => self.metrics.sent.advance(*n as u64, Instant::now()),
            Err(e) => self.metrics.observe_error(e, Phase::Write),
        }
    }
}
