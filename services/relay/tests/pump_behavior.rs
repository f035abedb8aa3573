
use std::time::Duration;

use harness::tcp_pair;
use sslpivot_relay::{ConnectionPair, RelayStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[tokio::test]
async fn pair_forwards_bytes_in_order_then_tears_down() {
    let (mut client_side, client_leg) = tcp_pair().await;
    let (mut upstream_side, upstream_leg) = tcp_pair().await;

    let pair = ConnectionPair::new(
        RelayStream::Plain(client_leg),
        RelayStream::Plain(upstream_leg),
    );
    tokio::spawn(pair.run());

    // More than one buffer's worth, written in uneven chunks.
    let payload: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
    for chunk in payload.chunks(1300) {
        client_side.write_all(chunk).await.unwrap();
    }
    client_side.shutdown().await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), upstream_side.read_to_end(&mut received))
        .await
        .expect("upstream leg was not closed")
        .unwrap();
    assert_eq!(received, payload);

    // The clean close of one direction tore the whole pair down, so the
    // client leg is closed as well.
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), client_side.read(&mut buf))
        .await
        .expect("client leg was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn echo_roundtrip_through_a_pair() {
    let (mut client_side, client_leg) = tcp_pair().await;
    let (mut upstream_side, upstream_leg) = tcp_pair().await;

    let pair = ConnectionPair::new(
        RelayStream::Plain(client_leg),
        RelayStream::Plain(upstream_leg),
    );
    tokio::spawn(pair.run());

    // Both directions make progress concurrently.
    client_side.write_all(b"request").await.unwrap();
    let mut buf = [0u8; 7];
    upstream_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"request");

    upstream_side.write_all(b"response").await.unwrap();
    let mut buf = [0u8; 8];
    client_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"response");
}

#[tokio::test]
async fn closed_destination_closes_both_legs() {
    let (mut client_side, client_leg) = tcp_pair().await;
    let (upstream_side, upstream_leg) = tcp_pair().await;

    let pair = ConnectionPair::new(
        RelayStream::Plain(client_leg),
        RelayStream::Plain(upstream_leg),
    );
    tokio::spawn(pair.run());

    // The destination goes away entirely. An RST (linger 0) makes the
    // write path fail rather than buffering silently.
    upstream_side.set_linger(Some(Duration::from_secs(0))).unwrap();
    drop(upstream_side);

    // Keep writing until the failure propagates back as a closed client
    // leg; the pump must not keep a half-dead pair alive.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if client_side.write_all(b"data for a dead peer").await.is_err() {
            break;
        }
        let mut buf = [0u8; 16];
        match timeout(Duration::from_millis(100), client_side.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            _ => {}
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pair was not torn down after destination closed"
        );
    }
}
