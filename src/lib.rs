//! Measure the throughput, errors and latency of network connections.
//!
//! Wrap a listener or a dialer and every connection it produces counts its
//! bytes, remembers its first unexpected error and periodically submits
//! samples to a [`Measured`] controller. The controller summarizes samples
//! per connection identity once per interval and hands the result to its
//! [`Reporter`]s, without ever making connection I/O wait on reporting.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use measured::{wrap_listener, ConnOptions, LogReporter, Measured};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> std::io::Result<()> {
//! let measured = Measured::new();
//! measured.start(Duration::from_secs(10), vec![Arc::new(LogReporter::default())]);
//!
//! let listener = TcpListener::bind("127.0.0.1:0").await?;
//! let mut listener = wrap_listener(listener, &measured, ConnOptions::new(Duration::from_secs(1)));
//! let (mut conn, _peer) = listener.accept().await?;
//! // ... use `conn` like any AsyncRead + AsyncWrite ...
//! conn.close().await?;
//! println!("{:?}", conn.stats());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod net;
pub mod reporter;

pub use config::MeasuredConfig;
pub use error::{ConfigError, ReportError};
pub use metrics::{
    ErrorKey, LatencyTracker, Measured, Phase, RateSampler, RateStats, Sample, TrafficTracker,
};
pub use net::{
    wrap_dialer, wrap_listener, Accept, ConnError, ConnMetrics, ConnOptions, Dial,
    MeasuredConn, MeasuredDialer, MeasuredListener, Stats, TcpDialer,
};
pub use reporter::{ErrorCounts, JsonLinesReporter, LogReporter, MemoryReporter, Reporter, Tags};
