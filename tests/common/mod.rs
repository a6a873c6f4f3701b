//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use measured::{Measured, MemoryReporter};

/// Controller flush interval used across integration tests
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Start a controller that records everything into a `MemoryReporter`.
pub fn start_with_memory_reporter() -> (Measured, Arc<MemoryReporter>) {
    measured::logging::init_test_logging();
    let measured = Measured::new();
    let reporter = Arc::new(MemoryReporter::new());
    measured.start(FLUSH_INTERVAL, vec![reporter.clone()]);
    (measured, reporter)
}

/// An address nothing listens on: bind an ephemeral port, then release it.
pub async fn unused_local_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}
