use std::sync::Arc;

use anyhow::Context;
use measured::logging::init_logging;
use measured::{wrap_listener, LogReporter, Measured, MeasuredConfig, MeasuredConn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Echo server whose connections are measured and logged.
///
/// Usage: `measured-echo [config.json] [listen-addr]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("info").context("failed to initialize logging")?;

    // ── 1. Load configuration ────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => MeasuredConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => MeasuredConfig::default(),
    };
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7007".into());

    // ── 2. Start the controller ──────────────────────────────────
    let measured = Measured::from_config(&config);
    measured.start(config.flush_interval(), vec![Arc::new(LogReporter::default())]);

    // ── 3. Bind & serve ──────────────────────────────────────────
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    let mut listener = wrap_listener(listener, &measured, config.conn_options());
    info!(addr = %listener.local_addr()?, "echo server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((conn, _peer)) => {
                    tokio::spawn(echo(conn));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down");
    measured.stop().await;
    Ok(())
}

async fn echo(mut conn: MeasuredConn<TcpStream>) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if conn.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    let _ = conn.close().await;
    let stats = conn.stats();
    info!(
        identity = conn.identity(),
        sent = stats.sent_total,
        received = stats.recv_total,
        first_error = ?conn.first_error(),
        "connection closed"
    );
}
