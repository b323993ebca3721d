mod common;
use common::*;

use inverter_collector::datalogger::packet::{encode_request, FRAME_LEN, REQUEST_LEN};
use inverter_collector::datalogger::transport::{
    Dialer, Establish, Link, SocketOptions, Transport, TransportKind,
};
use inverter_collector::error::TransportError;
use inverter_collector::prelude::*;

use std::time::Duration;

fn transport() -> Transport {
    Transport::new(SocketOptions {
        io_timeout: Duration::from_millis(500),
        ..SocketOptions::default()
    })
}

#[tokio::test]
async fn tcp_request_response() -> Result<()> {
    common_setup();

    let transport = transport();
    let listener = transport.listen(0).await?;
    let port = listener.local_addr().port();

    let server = tokio::spawn(async move {
        let mut conn = listener.accept().await?;
        let request = conn.recv(REQUEST_LEN).await?;
        conn.send(&Factory::reading_frame(9, 250)).await?;
        Ok::<_, TransportError>(request)
    });

    let mut client = transport.connect("127.0.0.1", port, TransportKind::Stream).await?;
    let request = encode_request(0x12345678);
    assert_eq!(client.send(request.as_bytes()).await?, REQUEST_LEN);

    let frame = client.recv(FRAME_LEN).await?;
    assert_eq!(frame.len(), FRAME_LEN);
    assert_eq!(&frame[..], &Factory::reading_frame(9, 250)[..]);

    let received = server.await??;
    assert_eq!(&received[..], request.as_bytes());
    Ok(())
}

#[tokio::test]
async fn peer_close_is_disconnect() -> Result<()> {
    common_setup();

    let transport = transport();
    let listener = transport.listen(0).await?;
    let port = listener.local_addr().port();

    let server = tokio::spawn(async move {
        let mut conn = listener.accept().await?;
        conn.close();
        Ok::<_, TransportError>(())
    });

    let mut client = transport.connect("127.0.0.1", port, TransportKind::Stream).await?;
    server.await??;

    let err = client.recv(FRAME_LEN).await.unwrap_err();
    assert!(err.is_disconnect(), "{}", err);
    Ok(())
}

#[tokio::test]
async fn silent_peer_times_out() -> Result<()> {
    common_setup();

    let transport = transport();
    let listener = transport.listen(0).await?;
    let port = listener.local_addr().port();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let conn = listener.accept().await?;
        // hold the connection open without saying anything
        let _ = done_rx.await;
        drop(conn);
        Ok::<_, TransportError>(())
    });

    let mut client = transport.connect("127.0.0.1", port, TransportKind::Stream).await?;
    let err = client.recv(FRAME_LEN).await.unwrap_err();
    assert!(err.is_timeout(), "{}", err);

    let _ = done_tx.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn connect_refused() -> Result<()> {
    common_setup();

    // grab a free port, then make sure nobody is listening on it
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let result = transport().connect("127.0.0.1", port, TransportKind::Stream).await;
    assert!(matches!(result, Err(TransportError::Connect { .. })));
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent() -> Result<()> {
    common_setup();

    let transport = transport();
    let listener = transport.listen(0).await?;
    let port = listener.local_addr().port();

    let server = tokio::spawn(async move { listener.accept().await });

    let mut client = transport.connect("127.0.0.1", port, TransportKind::Stream).await?;
    let _conn = server.await??;

    assert!(client.is_open());
    client.close();
    client.close();
    assert!(!client.is_open());

    let err = client.send(encode_request(1).as_bytes()).await.unwrap_err();
    assert!(matches!(err, TransportError::Io { .. }));
    assert!(client.recv(FRAME_LEN).await.is_err());
    Ok(())
}

#[tokio::test]
async fn udp_request_response() -> Result<()> {
    common_setup();

    let datalogger = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let port = datalogger.local_addr()?.port();

    let server = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (len, from) = datalogger.recv_from(&mut buf).await?;
        datalogger.send_to(&Factory::reading_frame(4, 40), from).await?;
        Ok::<_, std::io::Error>(buf[..len].to_vec())
    });

    let mut client = transport().connect("127.0.0.1", port, TransportKind::Datagram).await?;
    let request = encode_request(0x0badcafe);
    client.send(request.as_bytes()).await?;

    let frame = client.recv(FRAME_LEN).await?;
    assert_eq!(frame.len(), FRAME_LEN);
    assert_eq!(server.await??, request.as_bytes());
    Ok(())
}

#[tokio::test]
async fn empty_datagram_is_not_disconnect() -> Result<()> {
    common_setup();

    let datalogger = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let port = datalogger.local_addr()?.port();

    let server = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (_, from) = datalogger.recv_from(&mut buf).await?;
        datalogger.send_to(&[], from).await?;
        datalogger.send_to(&Factory::reading_frame(4, 40), from).await?;
        Ok::<_, std::io::Error>(())
    });

    let mut client = transport().connect("127.0.0.1", port, TransportKind::Datagram).await?;
    client.send(encode_request(0x0badcafe).as_bytes()).await?;

    assert!(client.recv(FRAME_LEN).await?.is_empty());
    assert_eq!(client.recv(FRAME_LEN).await?.len(), FRAME_LEN);
    assert!(client.is_open());

    server.await??;
    Ok(())
}

#[tokio::test]
async fn listener_accepts_repeatedly() -> Result<()> {
    common_setup();

    let transport = transport();
    let mut listener = transport.listen(0).await?;
    let port = listener.local_addr().port();
    assert_eq!(listener.describe(), format!("listener on {}", listener.local_addr()));

    for n in 0..2u32 {
        let mut client = transport.connect("127.0.0.1", port, TransportKind::Stream).await?;
        let mut conn = listener.establish().await?;

        client.send(&Factory::reading_frame(n, 0)).await?;
        let frame = conn.recv(FRAME_LEN).await?;
        assert_eq!(frame[4], n as u8);
        assert!(conn.peer().ip().is_loopback());
    }
    Ok(())
}

#[tokio::test]
async fn dialer_reconnects_to_same_peer() -> Result<()> {
    common_setup();

    let transport = transport();
    let listener = transport.listen(0).await?;
    let port = listener.local_addr().port();

    let mut dialer = Dialer::new(transport.clone(), "127.0.0.1", port, TransportKind::Stream);
    assert_eq!(dialer.describe(), format!("127.0.0.1:{}", port));

    let server = tokio::spawn(async move {
        listener.accept().await?;
        listener.accept().await?;
        Ok::<_, TransportError>(())
    });

    let first = dialer.establish().await?;
    let second = dialer.establish().await?;
    assert_eq!(first.peer(), second.peer());
    assert_eq!(first.peer().port(), port);

    server.await??;
    Ok(())
}

#[test]
fn dialer_describes_udp() {
    let dialer = Dialer::new(Transport::default(), "10.0.0.7", 8899, TransportKind::Datagram);
    assert_eq!(dialer.describe(), "10.0.0.7:8899 (udp)");
}
