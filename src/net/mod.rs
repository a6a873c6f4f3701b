//! Connection, listener and dialer wrappers
//!
//! Everything here decorates a tokio stream without changing its
//! behavior: callers see the same bytes and the same errors, while byte
//! counts and failures flow into a [`Measured`](crate::metrics::Measured)
//! controller.

pub mod conn;
pub mod dialer;
pub mod listener;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use conn::{ConnError, ConnMetrics, MeasuredConn, Stats};
pub use dialer::{wrap_dialer, Dial, MeasuredDialer, TcpDialer};
pub use listener::{wrap_listener, Accept, MeasuredListener};

/// Shortest accepted rate window
const MIN_RATE_INTERVAL: Duration = Duration::from_millis(1);

/// Invoked once per connection after its final report.
pub type FinishCallback = Arc<dyn Fn(&ConnMetrics) + Send + Sync>;

/// How wrapped connections are tracked.
#[derive(Clone)]
pub struct ConnOptions {
    interval: Duration,
    identity: Option<String>,
    on_finish: Option<FinishCallback>,
}

impl ConnOptions {
    /// Recompute rates and report traffic every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_RATE_INTERVAL),
            identity: None,
            on_finish: None,
        }
    }

    /// Tag every connection with `identity` instead of its remote address.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Receive each connection's final statistics once it is done.
    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnMetrics) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(f));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn identity_or(&self, fallback: impl FnOnce() -> String) -> String {
        self.identity.clone().unwrap_or_else(fallback)
    }
}

impl fmt::Debug for ConnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnOptions")
            .field("interval", &self.interval)
            .field("identity", &self.identity)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}
