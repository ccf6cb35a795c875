//! Integration tests for the length-prefixed TCP listener.

mod helpers;

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use helpers::{Behavior, TestProtocol, read_packet, test_manager, wait_until, write_packet};
use wirehub_net::{Manager, TcpServer, json_codec};

#[tokio::test]
async fn test_message_then_disconnect() {
    let manager = test_manager();
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(manager.clone(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    write_packet(&mut client, br#"{"x":1}"#).await;

    protocol.wait_for_messages(1).await;
    assert_eq!(protocol.messages(), vec![serde_json::json!({"x": 1})]);

    let session = protocol.sessions().remove(0);
    let remote = session.remote_addr().unwrap();
    assert_eq!(remote, client.local_addr().unwrap().to_string());
    assert_eq!(manager.session_count(), 1);

    drop(client);
    protocol.wait_for_disconnects(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(protocol.messages().len(), 1);
    assert_eq!(protocol.disconnects(), 1);
    assert!(session.is_closed());
    assert_eq!(manager.session_count(), 0);
    server.stop();
}

#[tokio::test]
async fn test_reply_is_framed() {
    let manager = test_manager();
    let protocol = TestProtocol::new(Behavior::Echo);
    let server = TcpServer::new(manager, json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    write_packet(&mut client, br#"{"hello":"world"}"#).await;

    let payload = read_packet(&mut client).await;
    let reply: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(reply, serde_json::json!({"hello": "world"}));
    server.stop();
}

#[tokio::test]
async fn test_packets_split_across_writes() {
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(test_manager(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let payload = br#"{"n":1}"#;
    let mut packet = ((payload.len() + 6) as u16).to_le_bytes().to_vec();
    packet.extend_from_slice(&[0; 4]);
    packet.extend_from_slice(payload);

    client.write_all(&packet[..3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(&packet[3..]).await.unwrap();
    write_packet(&mut client, br#"{"n":2}"#).await;

    protocol.wait_for_messages(2).await;
    assert_eq!(
        protocol.messages(),
        vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]
    );
    server.stop();
}

#[tokio::test]
async fn test_oversized_header_closes_connection() {
    let manager = test_manager();
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(manager.clone(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut header = 5000u16.to_le_bytes().to_vec();
    header.extend_from_slice(&[0; 4]);
    client.write_all(&header).await.unwrap();

    protocol.wait_for_disconnects(1).await;
    assert!(protocol.messages().is_empty());
    assert_eq!(manager.session_count(), 0);

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    server.stop();
}

#[tokio::test]
async fn test_invalid_json_closes_connection() {
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(test_manager(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    write_packet(&mut client, b"{not json").await;

    protocol.wait_for_disconnects(1).await;
    assert!(protocol.messages().is_empty());
    server.stop();
}

#[tokio::test]
async fn test_stop_refuses_new_connections() {
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(test_manager(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let established = TcpStream::connect(addr).await.unwrap();
    protocol.wait_for_connects(1).await;

    server.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(TcpStream::connect(addr).await.is_err());
    // Established sessions are not affected.
    assert_eq!(protocol.disconnects(), 0);
    drop(established);
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let server = TcpServer::new(
        test_manager(),
        json_codec(),
        TestProtocol::new(Behavior::Record),
    );
    server.start("127.0.0.1:0").await.unwrap();
    assert!(server.start("127.0.0.1:0").await.is_err());
    server.stop();
}

#[tokio::test]
async fn test_expired_session_with_stuck_reader_is_reclaimed() {
    let manager = Manager::new(
        CancellationToken::new(),
        1,
        Duration::from_millis(100),
        Duration::from_millis(500),
    );
    let protocol = TestProtocol::new(Behavior::Record);
    let server = TcpServer::new(manager.clone(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();

    // Connected but never reading, so the server's send buffer fills up.
    let _client = TcpStream::connect(addr).await.unwrap();
    protocol.wait_for_connects(1).await;
    let session = protocol.sessions().remove(0);

    let payload = Bytes::from(vec![b'x'; 4000]);
    let flood_until = tokio::time::Instant::now() + Duration::from_millis(400);
    while tokio::time::Instant::now() < flood_until {
        let _ = session.async_write(payload.clone(), Duration::ZERO).await;
        tokio::task::yield_now().await;
    }

    let idle_protocol = TestProtocol::new(Behavior::Record);
    let idle = manager.new_session(idle_protocol.clone());

    protocol.wait_for_disconnects(1).await;
    idle_protocol.wait_for_disconnects(1).await;

    assert!(session.is_closed());
    assert!(idle.is_closed());
    assert_eq!(manager.session_count(), 0);
    server.stop();
}
