use std::future::Future;
use std::io;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use super::{ConnOptions, MeasuredConn};
use crate::metrics::{Measured, Phase, Sample};

/// Something that opens connections to an address.
///
/// Implemented for [`TcpDialer`], for closures `Fn(String) -> Future`, and
/// for [`MeasuredDialer`] itself, so wrapped dialers stay substitutable.
pub trait Dial: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<Self::Io>> + Send;
}

/// Plain `TcpStream::connect`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dial for TcpDialer {
    type Io = TcpStream;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = addr.to_owned();
        async move { TcpStream::connect(addr).await }
    }
}

impl<F, Fut, S> Dial for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<S>> + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = S;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<S>> + Send {
        self(addr.to_owned())
    }
}

/// Dialer whose connections are measured.
///
/// Failed dials are reported as `dial` errors and returned untouched;
/// successful dials report their connect time as a latency sample.
#[derive(Debug, Clone)]
pub struct MeasuredDialer<D> {
    inner: D,
    measured: Measured,
    opts: ConnOptions,
}

/// Wrap `dial` so every connection it opens is measured by `measured`.
pub fn wrap_dialer<D: Dial>(dial: D, measured: &Measured, opts: ConnOptions) -> MeasuredDialer<D> {
    MeasuredDialer {
        inner: dial,
        measured: measured.clone(),
        opts,
    }
}

impl<D: Dial> MeasuredDialer<D> {
    pub async fn dial(&self, addr: &str) -> io::Result<MeasuredConn<D::Io>> {
        let identity = self.opts.identity_or(|| addr.to_owned());
        let started = Instant::now();

        match self.inner.dial(addr).await {
            Ok(io) => {
                let elapsed = started.elapsed();
                debug!(identity = %identity, connect_us = elapsed.as_micros() as u64, "dialed");
                self.measured.submit(Sample::Latency {
                    identity: identity.clone(),
                    duration: elapsed,
                });
                Ok(MeasuredConn::new(io, identity, &self.measured, &self.opts))
            }
            Err(e) => {
                debug!(identity = %identity, error = %e, "dial failed");
                self.measured.submit(Sample::error(identity, &e, Phase::Dial));
                Err(e)
            }
        }
    }

    pub fn get_ref(&self) -> &D {
        &self.inner
    }
}

impl<D: Dial> Dial for MeasuredDialer<D> {
    type Io = MeasuredConn<D::Io>;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<Self::Io>> + Send {
        MeasuredDialer::dial(self, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::MemoryReporter;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn opts() -> ConnOptions {
        ConnOptions::new(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn closure_dialer_is_wrapped_with_dialed_address_as_identity() {
        let measured = Measured::new();
        let reporter = Arc::new(MemoryReporter::new());
        measured.start(Duration::from_secs(60), vec![reporter.clone()]);

        let dialer = wrap_dialer(
            |_addr: String| async {
                let (a, mut b) = tokio::io::duplex(64);
                tokio::spawn(async move {
                    let mut buf = [0u8; 5];
                    let _ = b.read_exact(&mut buf).await;
                });
                Ok::<DuplexStream, io::Error>(a)
            },
            &measured,
            opts(),
        );

        let mut conn = dialer.dial("cache:6379").await.unwrap();
        assert_eq!(conn.identity(), "cache:6379");
        conn.write_all(b"hello").await.unwrap();
        conn.close().await.unwrap();
        measured.stop().await;

        let latency = reporter.latencies();
        assert_eq!(latency.len(), 1);
        assert_eq!(latency[0].id, "cache:6379");
        assert_eq!(reporter.traffic_for("cache:6379")[0].total_out, 5);
    }

    #[tokio::test]
    async fn failures_are_reported_and_returned_untouched() {
        let measured = Measured::new();
        let reporter = Arc::new(MemoryReporter::new());
        measured.start(Duration::from_secs(60), vec![reporter.clone()]);

        let dialer = wrap_dialer(
            |_addr: String| async {
                Err::<DuplexStream, _>(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "dial tcp: blocked by policy",
                ))
            },
            &measured,
            opts().with_identity("upstream"),
        );

        let e = dialer.dial("10.1.1.1:80").await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(e.to_string(), "dial tcp: blocked by policy");
        measured.stop().await;

        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        let (key, count) = &errors[0];
        assert_eq!(key.identity, "upstream");
        assert_eq!(key.phase, Phase::Dial);
        assert_eq!(key.message, "blocked by policy");
        assert_eq!(*count, 1);
    }

    #[tokio::test]
    async fn measured_dialer_is_itself_a_dialer() {
        async fn open<D: Dial>(d: &D) -> io::Result<D::Io> {
            d.dial("inner:1").await
        }

        let measured = Measured::new();
        let dialer = wrap_dialer(
            |_addr: String| async { Ok::<_, io::Error>(tokio::io::duplex(8).0) },
            &measured,
            opts(),
        );
        let conn = open(&dialer).await.unwrap();
        assert_eq!(conn.identity(), "inner:1");
    }
}
