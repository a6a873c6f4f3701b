//! Dialer wrapping against real sockets

mod common;

use std::io;
use std::time::Duration;

use measured::{wrap_dialer, ConnOptions, Phase, TcpDialer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{start_with_memory_reporter, unused_local_addr, FLUSH_INTERVAL};

#[tokio::test]
async fn test_refused_dials_are_reported_as_dial_errors() {
    let (measured, reporter) = start_with_memory_reporter();
    let dialer = wrap_dialer(TcpDialer, &measured, ConnOptions::new(Duration::from_secs(10)));
    let addr = unused_local_addr().await;

    for _ in 0..2 {
        let err = dialer.dial(&addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    tokio::time::sleep(FLUSH_INTERVAL * 4).await;

    let errors = reporter.errors();
    assert_eq!(reporter.error_total(), 2);
    for (key, _) in &errors {
        assert_eq!(key.identity, addr);
        assert_eq!(key.phase, Phase::Dial);
        assert_eq!(key.message, "connection refused");
    }
    assert!(reporter.latencies().is_empty());

    measured.stop().await;
}

#[tokio::test]
async fn test_successful_dial_reports_latency_and_traffic() {
    let (measured, reporter) = start_with_memory_reporter();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(b"pong!").await.unwrap();
    });

    let dialer = wrap_dialer(TcpDialer, &measured, ConnOptions::new(Duration::from_millis(10)));
    let mut conn = dialer.dial(&addr).await.unwrap();
    conn.write_all(b"ping").await.unwrap();
    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"pong!");
    conn.close().await.unwrap();
    server.await.unwrap();

    let stats = conn.stats();
    assert_eq!(stats.sent_total, 4);
    assert_eq!(stats.recv_total, 5);
    assert!(conn.first_error().is_none());

    measured.stop().await;

    let latency = reporter.latencies();
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].id, addr);

    let traffic = reporter.traffic_for(&addr);
    assert_eq!(traffic.iter().map(|t| t.total_out).sum::<u64>(), 4);
    assert_eq!(traffic.iter().map(|t| t.total_in).sum::<u64>(), 5);
}
