use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::Stream;

use super::{ConnOptions, MeasuredConn};
use crate::metrics::Measured;

/// Source of inbound connections.
pub trait Accept: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Addr: fmt::Display + fmt::Debug + Send + 'static;

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(Self::Io, Self::Addr)>>;

    fn local_addr(&self) -> io::Result<Self::Addr>;
}

impl Accept for TcpListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        TcpListener::poll_accept(&*self, cx)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Listener whose accepted connections are measured.
///
/// Each connection's identity is the configured override or the peer
/// address. Closing the listener is dropping it.
pub struct MeasuredListener<L> {
    inner: L,
    measured: Measured,
    opts: ConnOptions,
}

/// Wrap `listener` so every connection it accepts is measured by `measured`.
pub fn wrap_listener<L: Accept>(
    listener: L,
    measured: &Measured,
    opts: ConnOptions,
) -> MeasuredListener<L> {
    MeasuredListener {
        inner: listener,
        measured: measured.clone(),
        opts,
    }
}

impl<L: Accept> MeasuredListener<L> {
    pub async fn accept(&mut self) -> io::Result<(MeasuredConn<L::Io>, L::Addr)> {
        poll_fn(|cx| self.poll_accept(cx)).await
    }

    pub fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(MeasuredConn<L::Io>, L::Addr)>> {
        let (io, addr) = ready!(self.inner.poll_accept(cx))?;
        let identity = self.opts.identity_or(|| addr.to_string());
        let conn = MeasuredConn::new(io, identity, &self.measured, &self.opts);
        Poll::Ready(Ok((conn, addr)))
    }

    pub fn local_addr(&self) -> io::Result<L::Addr> {
        self.inner.local_addr()
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: Accept + Unpin> Stream for MeasuredListener<L> {
    type Item = io::Result<MeasuredConn<L::Io>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let result = ready!(self.get_mut().poll_accept(cx));
        Poll::Ready(Some(result.map(|(conn, _)| conn)))
    }
}

impl<L: fmt::Debug> fmt::Debug for MeasuredListener<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasuredListener")
            .field("inner", &self.inner)
            .field("opts", &self.opts)
            .finish()
    }
}

#[cfg(feature = "axum")]
mod serve {
    use std::time::Duration;

    use tracing::warn;

    use super::*;

    /// Back-off after a failed accept (e.g. out of file descriptors)
    const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

    impl<L: Accept> axum::serve::Listener for MeasuredListener<L> {
        type Io = MeasuredConn<L::Io>;
        type Addr = L::Addr;

        async fn accept(&mut self) -> (Self::Io, Self::Addr) {
            loop {
                match MeasuredListener::accept(self).await {
                    Ok(pair) => return pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed, retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }

        fn local_addr(&self) -> io::Result<Self::Addr> {
            self.inner.local_addr()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::MemoryReporter;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn accepted_connections_use_peer_address_as_identity() {
        let measured = Measured::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut listener =
            wrap_listener(listener, &measured, ConnOptions::new(Duration::from_millis(10)));
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            stream.local_addr().unwrap()
        });

        let (conn, peer) = listener.accept().await.unwrap();
        let client_addr = client.await.unwrap();
        assert_eq!(peer, client_addr);
        assert_eq!(conn.identity(), client_addr.to_string());
    }

    #[tokio::test]
    async fn stream_of_connections_with_identity_override() {
        let measured = Measured::new();
        let reporter = Arc::new(MemoryReporter::new());
        measured.start(Duration::from_secs(60), vec![reporter.clone()]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut incoming = wrap_listener(
            listener,
            &measured,
            ConnOptions::new(Duration::from_millis(10)).with_identity("frontend"),
        );

        tokio::spawn(async move {
            for _ in 0..2 {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(b"abc").await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });

        for _ in 0..2 {
            let mut conn = incoming.next().await.unwrap().unwrap();
            assert_eq!(conn.identity(), "frontend");
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"abc");
            conn.close().await.unwrap();
        }
        measured.stop().await;

        let total: u64 = reporter.traffic_for("frontend").iter().map(|t| t.total_in).sum();
        assert_eq!(total, 6);
    }
}
