//! Integration tests for the WebSocket listener and the reconnecting client.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use helpers::{Behavior, TestProtocol, test_manager, wait_until};
use wirehub_net::{
    ClientState, NetError, ReconnectingClient, WebsocketServer, connect_session, json_codec,
};

async fn start_server(protocol: &Arc<TestProtocol>) -> (WebsocketServer, String) {
    let server = WebsocketServer::new(test_manager(), json_codec(), protocol.clone());
    let addr = server.start("127.0.0.1:0").await.unwrap();
    (server, format!("ws://{addr}/"))
}

#[tokio::test]
async fn test_upgrade_records_peer_metadata() {
    let protocol = TestProtocol::new(Behavior::Record);
    let (server, url) = start_server(&protocol).await;

    let mut request = url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("User-Agent", HeaderValue::from_static("wirehub-test/1.0"));
    let (mut ws, _) = connect_async(request).await.unwrap();

    ws.send(WsMessage::text(r#"{"x":1}"#.to_string())).await.unwrap();
    protocol.wait_for_messages(1).await;
    assert_eq!(protocol.messages(), vec![serde_json::json!({"x": 1})]);

    let session = protocol.sessions().remove(0);
    assert_eq!(session.user_agent().as_deref(), Some("wirehub-test/1.0"));
    assert!(session.remote_addr().unwrap().starts_with("127.0.0.1:"));

    ws.close(None).await.unwrap();
    protocol.wait_for_disconnects(1).await;
    server.stop();
}

#[tokio::test]
async fn test_echo_over_text_frames() {
    let protocol = TestProtocol::new(Behavior::Echo);
    let (server, url) = start_server(&protocol).await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(WsMessage::text(r#"{"ping":42}"#.to_string())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply, serde_json::json!({"ping": 42}));
    server.stop();
}

#[tokio::test]
async fn test_connect_session_dials_out() {
    let server_protocol = TestProtocol::new(Behavior::Echo);
    let (server, url) = start_server(&server_protocol).await;

    let client_protocol = TestProtocol::new(Behavior::Record);
    let session = connect_session(&url, json_codec(), client_protocol.clone())
        .await
        .unwrap();
    assert_eq!(client_protocol.connects(), 1);

    session
        .async_write(Bytes::from_static(br#"{"hi":true}"#), Duration::from_secs(1))
        .await
        .unwrap();
    client_protocol.wait_for_messages(1).await;
    assert_eq!(client_protocol.messages(), vec![serde_json::json!({"hi": true})]);

    session.close().await;
    server_protocol.wait_for_disconnects(1).await;
    server.stop();
}

#[tokio::test]
async fn test_client_first_dial_must_succeed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = ReconnectingClient::builder(
        format!("ws://{addr}/"),
        json_codec(),
        TestProtocol::new(Behavior::Record),
    )
    .connect()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_client_keepalive_reaches_server() {
    let server_protocol = TestProtocol::new(Behavior::Record);
    let (server, url) = start_server(&server_protocol).await;

    let client = ReconnectingClient::builder(url, json_codec(), TestProtocol::new(Behavior::Record))
        .keepalive(
            Duration::from_millis(50),
            Arc::new(|| Bytes::from_static(br#"{"type":"keepalive"}"#)),
        )
        .connect()
        .await
        .unwrap();
    assert_eq!(client.state(), ClientState::Connected);

    server_protocol.wait_for_messages(2).await;
    assert!(
        server_protocol
            .messages()
            .iter()
            .all(|m| m == &serde_json::json!({"type": "keepalive"}))
    );

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn test_client_reconnects_after_server_drop() {
    let server_protocol = TestProtocol::new(Behavior::Record);
    let (server, url) = start_server(&server_protocol).await;

    let client_protocol = TestProtocol::new(Behavior::Record);
    let client = ReconnectingClient::builder(url, json_codec(), client_protocol.clone())
        .retry_delay(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();
    server_protocol.wait_for_connects(1).await;
    let first = client.session().unwrap();

    // Drop the link from the server side.
    server_protocol.sessions()[0].close().await;

    client_protocol.wait_for_disconnects(1).await;
    server_protocol.wait_for_connects(2).await;
    wait_until("reconnected", || client.state() == ClientState::Connected).await;

    let second = client.session().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(client_protocol.connects(), 2);

    client
        .send(Bytes::from_static(br#"{"after":"reconnect"}"#))
        .await
        .unwrap();
    server_protocol.wait_for_messages(1).await;
    assert_eq!(
        server_protocol.messages(),
        vec![serde_json::json!({"after": "reconnect"})]
    );

    client.close().await;
    assert_eq!(client.state(), ClientState::Closed);
    server.stop();
}

#[tokio::test]
async fn test_client_retries_until_server_returns() {
    let server_protocol = TestProtocol::new(Behavior::Record);
    let (server, url) = start_server(&server_protocol).await;
    let addr = url
        .trim_start_matches("ws://")
        .trim_end_matches('/')
        .to_string();

    let client_protocol = TestProtocol::new(Behavior::Record);
    let client = ReconnectingClient::builder(url.clone(), json_codec(), client_protocol.clone())
        .retry_delay(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();
    server_protocol.wait_for_connects(1).await;

    server.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server_protocol.sessions()[0].close().await;

    client_protocol.wait_for_disconnects(1).await;
    wait_until("session cleared", || client.session().is_none()).await;
    assert!(matches!(
        client.send(Bytes::from_static(b"{}")).await,
        Err(NetError::NotConnected)
    ));

    // Several failed attempts go by before the listener comes back.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_ne!(client.state(), ClientState::Connected);

    let revived = WebsocketServer::new(test_manager(), json_codec(), server_protocol.clone());
    revived.start(&addr).await.unwrap();

    server_protocol.wait_for_connects(2).await;
    wait_until("reconnected", || client.state() == ClientState::Connected).await;
    assert_eq!(client_protocol.connects(), 2);

    client.close().await;
    revived.stop();
}

#[tokio::test]
async fn test_close_stops_reconnecting() {
    let server_protocol = TestProtocol::new(Behavior::Record);
    let (server, url) = start_server(&server_protocol).await;

    let client_protocol = TestProtocol::new(Behavior::Record);
    let client = ReconnectingClient::builder(url, json_codec(), client_protocol.clone())
        .retry_delay(Duration::from_millis(50))
        .connect()
        .await
        .unwrap();
    server_protocol.wait_for_connects(1).await;

    client.close().await;
    client_protocol.wait_for_disconnects(1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(server_protocol.connects(), 1);
    assert_eq!(client_protocol.connects(), 1);
    assert!(client.session().is_none());
    assert!(matches!(
        client.send(Bytes::from_static(b"{}")).await,
        Err(NetError::NotConnected)
    ));
    server.stop();
}
