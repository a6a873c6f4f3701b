//! Listener wrapping: terminal statistics through the finish callback

mod common;

use std::time::Duration;

use measured::{wrap_listener, ConnOptions, Stats};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use common::start_with_memory_reporter;

#[tokio::test]
async fn test_measured_listener_finish_callback() {
    let (measured, reporter) = start_with_memory_reporter();
    let rate_interval = Duration::from_millis(50);

    let (tx, mut rx) = mpsc::unbounded_channel::<(Stats, bool, String)>();
    let opts = ConnOptions::new(rate_interval).on_finish(move |conn| {
        let _ = tx.send((
            conn.stats(),
            conn.first_error().is_none(),
            conn.identity().to_owned(),
        ));
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut listener = wrap_listener(listener, &measured, opts);

    let server = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(b"12345678").await.unwrap();

        let mut buf = [0u8; 10];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"1234567890");

        // Be inactive for a bit
        tokio::time::sleep(rate_interval * 3).await;
        conn.close().await.unwrap();
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let client_addr = client.local_addr().unwrap().to_string();
    let mut greeting = [0u8; 8];
    client.read_exact(&mut greeting).await.unwrap();
    client.write_all(b"1234567890").await.unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    server.await.unwrap();

    let (stats, no_error, identity) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(no_error);
    assert_eq!(identity, client_addr);

    assert_eq!(stats.sent_total, 8);
    assert!(stats.sent_min > 0.0);
    assert!(stats.sent_max > 0.0);
    assert!(stats.sent_avg > 0.0);

    assert_eq!(stats.recv_total, 10);
    assert!(stats.recv_min > 0.0);
    assert!(stats.recv_max > 0.0);
    assert!(stats.recv_avg > 0.0);

    assert!(
        stats.duration > Duration::from_millis(10),
        "stats should have some duration"
    );

    // Exactly one finish per connection
    assert!(rx.try_recv().is_err());

    measured.stop().await;
    let traffic = reporter.traffic_for(&client_addr);
    assert_eq!(traffic.iter().map(|t| t.total_in).sum::<u64>(), 10);
    assert_eq!(traffic.iter().map(|t| t.total_out).sum::<u64>(), 8);
}
