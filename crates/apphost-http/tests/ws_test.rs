// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebSocket upgrade and message exchange through the engine.

use apphost_http::{HeaderMap, HttpEngine, Pipe, Protocol, ReadState, WsMessage};

/// Run a websocket handshake and return connected (client, server) engines.
async fn upgraded_pair() -> (HttpEngine, HttpEngine) {
    let (a, b) = tokio::io::duplex(1 << 20);
    let mut client = HttpEngine::client(Pipe::new(a));
    let mut server = HttpEngine::server(Pipe::new(b));

    let headers = HeaderMap::new()
        .with("connection", "Upgrade")
        .with("upgrade", "websocket")
        .with("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .with("sec-websocket-version", "13");
    client
        .write_request("GET", "/ws", &headers, b"")
        .await
        .unwrap();

    server.start().await.unwrap();
    assert_eq!(server.protocol(), Protocol::Ws);
    assert_eq!(server.read_state(), ReadState::Upgraded);
    server.upgrade().await.unwrap();

    client.start().await.unwrap();
    assert_eq!(client.status().unwrap().code, 101);
    assert_eq!(
        client.headers().get("sec-websocket-accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert_eq!(client.protocol(), Protocol::Ws);

    (client, server)
}

#[tokio::test]
async fn test_upgrade_handshake() {
    let _ = upgraded_pair().await;
}

#[tokio::test]
async fn test_text_echo() {
    let (mut client, mut server) = upgraded_pair().await;

    client.ws_send_text("ping me").await.unwrap();
    let msg = server.ws_recv().await.unwrap().unwrap();
    assert_eq!(msg, WsMessage::Text("ping me".to_string()));

    server.ws_send_text("ping me").await.unwrap();
    let echo = client.ws_recv().await.unwrap().unwrap();
    assert_eq!(echo, WsMessage::Text("ping me".to_string()));
}

#[tokio::test]
async fn test_binary_round_trip() {
    let (mut client, mut server) = upgraded_pair().await;

    let payload: Vec<u8> = (0..=255).collect();
    client.ws_send_binary(&payload).await.unwrap();
    match server.ws_recv().await.unwrap().unwrap() {
        WsMessage::Binary(data) => assert_eq!(&data[..], &payload[..]),
        other => panic!("expected binary message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_keeps_connection_open() {
    let (mut client, mut server) = upgraded_pair().await;

    // PING is answered inline with an identical PONG and the
    // connection stays usable for data afterwards.
    client.ws_send_ping(&[0x01, 0x02]).await.unwrap();
    client.ws_send_text("still here").await.unwrap();

    let msg = server.ws_recv().await.unwrap().unwrap();
    assert_eq!(msg, WsMessage::Text("still here".to_string()));
}

#[tokio::test]
async fn test_close_handshake() {
    let (mut client, mut server) = upgraded_pair().await;

    client.ws_send_close(1000).await.unwrap();
    // Server observes the close and echoes it.
    assert!(server.ws_recv().await.unwrap().is_none());
    // Client sees the echoed close as end-of-stream too.
    assert!(client.ws_recv().await.unwrap().is_none());
}

#[tokio::test]
async fn test_upgrade_refused_without_request() {
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut client = HttpEngine::client(Pipe::new(a));
    let mut server = HttpEngine::server(Pipe::new(b));

    client
        .write_request("GET", "/plain", &HeaderMap::new(), b"")
        .await
        .unwrap();
    server.start().await.unwrap();
    assert_eq!(server.protocol(), Protocol::Http);
    assert!(server.upgrade().await.is_err());
}
