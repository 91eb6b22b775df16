// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end routing tests over in-memory connections.

use std::sync::Arc;

use apphost_http::{
    handler, middleware, serve_dir, server, HeaderMap, HttpEngine, Pipe, Router, StaticOptions,
};

/// Spawn a server for `router` and return a connected client engine.
fn connect(router: Arc<Router>) -> HttpEngine {
    let (a, b) = tokio::io::duplex(1 << 20);
    tokio::spawn(server::drive_connection(b, router));
    HttpEngine::client(Pipe::new(a))
}

async fn get(client: &mut HttpEngine, path: &str) -> (u16, Vec<u8>) {
    request(client, "GET", path, &HeaderMap::new(), b"").await
}

async fn request(
    client: &mut HttpEngine,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> (u16, Vec<u8>) {
    client
        .write_request(method, path, headers, body)
        .await
        .unwrap();
    client.start().await.unwrap();
    let code = client.status().unwrap().code;
    let body = client.read_body_to_end(1 << 20).await.unwrap().to_vec();
    (code, body)
}

#[tokio::test]
async fn test_no_route_matched() {
    let router = Arc::new(Router::new());
    let mut client = connect(router);
    let (code, body) = get(&mut client, "/nothing").await;
    assert_eq!(code, 404);
    assert_eq!(body, b"No Route Matched");
}

#[tokio::test]
async fn test_param_route_and_query() {
    let mut router = Router::new();
    router.get(
        "/hello/:name",
        handler(|ctx| {
            Box::pin(async move {
                let name = ctx.param("name").unwrap_or("?").to_string();
                let greeting = ctx
                    .query
                    .get("greeting")
                    .cloned()
                    .unwrap_or_else(|| "hi".to_string());
                ctx.send(format!("{greeting} {name}"), 200).await
            })
        }),
    );

    let mut client = connect(Arc::new(router));
    let (code, body) = get(&mut client, "/hello/world?greeting=hey").await;
    assert_eq!(code, 200);
    assert_eq!(body, b"hey world");
}

#[tokio::test]
async fn test_chunked_echo() {
    // Two chunks "He" + "llo" echo back as one fixed-length body.
    let mut router = Router::new();
    router.post(
        "/echo",
        handler(|ctx| {
            Box::pin(async move {
                let body = ctx.bytes().await?;
                ctx.send(body, 200).await
            })
        }),
    );

    let mut client = connect(Arc::new(router));
    let headers = HeaderMap::new().with("transfer-encoding", "chunked");
    client
        .write_request("POST", "/echo", &headers, b"")
        .await
        .unwrap();
    client.write_chunk(b"He").await.unwrap();
    client.write_chunk(b"llo").await.unwrap();
    client.end_chunked(None).await.unwrap();

    client.start().await.unwrap();
    assert_eq!(client.status().unwrap().code, 200);
    assert_eq!(client.headers().get("content-length"), Some("5"));
    let body = client.read_body_to_end(64).await.unwrap();
    assert_eq!(&body[..], b"Hello");
}

#[tokio::test]
async fn test_middleware_runs_in_order() {
    let mut router = Router::new();
    router.with_middleware(middleware(|ctx, next| {
        Box::pin(async move {
            ctx.state
                .insert("trace".to_string(), serde_json::json!("mw"));
            next.run(ctx).await
        })
    }));
    router.get(
        "/traced",
        handler(|ctx| {
            Box::pin(async move {
                let trace = ctx.state.get("trace").cloned().unwrap_or_default();
                ctx.send(trace.as_str().unwrap_or("").as_bytes(), 200).await
            })
        }),
    );

    let mut client = connect(Arc::new(router));
    let (code, body) = get(&mut client, "/traced").await;
    assert_eq!(code, 200);
    assert_eq!(body, b"mw");
}

#[tokio::test]
async fn test_handler_error_becomes_500() {
    let mut router = Router::new();
    router.get(
        "/boom",
        handler(|_ctx| {
            Box::pin(async move { Err(apphost_http::HttpError::Protocol("boom".to_string())) })
        }),
    );

    let mut client = connect(Arc::new(router));
    let (code, body) = get(&mut client, "/boom").await;
    assert_eq!(code, 500);
    assert_eq!(body, b"protocol violation: boom");
}

#[tokio::test]
async fn test_error_handler_runs_on_fresh_context() {
    let mut router = Router::new();
    router.get(
        "/boom",
        handler(|_ctx| {
            Box::pin(async move { Err(apphost_http::HttpError::Protocol("boom".to_string())) })
        }),
    );
    router.on_error(handler(|ctx| {
        Box::pin(async move {
            let message = ctx
                .state
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            ctx.send_json(&serde_json::json!({ "error": message }), 500)
                .await
        })
    }));

    let mut client = connect(Arc::new(router));
    let (code, body) = get(&mut client, "/boom").await;
    assert_eq!(code, 500);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"], "protocol violation: boom");
}

#[tokio::test]
async fn test_keep_alive_across_requests() {
    let mut router = Router::new();
    router.get(
        "/a",
        handler(|ctx| Box::pin(async move { ctx.send(b"A".as_slice(), 200).await })),
    );
    router.get(
        "/b",
        handler(|ctx| Box::pin(async move { ctx.send(b"B".as_slice(), 200).await })),
    );

    let mut client = connect(Arc::new(router));
    let (_, body) = get(&mut client, "/a").await;
    assert_eq!(body, b"A");
    client.reuse().unwrap();
    let (_, body) = get(&mut client, "/b").await;
    assert_eq!(body, b"B");
}

#[tokio::test]
async fn test_chunked_response_stream() {
    let mut router = Router::new();
    router.get(
        "/stream",
        handler(|ctx| {
            Box::pin(async move {
                let mut writer = ctx.stream(200, None, &HeaderMap::new()).await?;
                writer.write(b"part one ").await?;
                writer.write(b"part two").await?;
                writer.finish().await
            })
        }),
    );

    let mut client = connect(Arc::new(router));
    let (code, body) = get(&mut client, "/stream").await;
    assert_eq!(code, 200);
    assert_eq!(body, b"part one part two");
}

#[tokio::test]
async fn test_static_etag_and_not_modified() {
    // A first GET yields an ETag, a conditional GET with
    // that ETag yields 304 with no body.
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello").unwrap();

    let mut router = Router::new();
    serve_dir(&mut router, "/", dir.path(), StaticOptions::default());
    let router = Arc::new(router);

    let mut client = connect(router.clone());
    client
        .write_request("GET", "/index.html", &HeaderMap::new(), b"")
        .await
        .unwrap();
    client.start().await.unwrap();
    assert_eq!(client.status().unwrap().code, 200);
    assert_eq!(
        client.headers().get("content-type"),
        Some("text/html; charset=utf-8")
    );
    let etag = client.headers().get("etag").unwrap().to_string();
    assert!(etag.starts_with("\"5-"));
    let body = client.read_body_to_end(64).await.unwrap();
    assert_eq!(&body[..], b"hello");

    client.reuse().unwrap();
    let conditional = HeaderMap::new().with("if-none-match", etag);
    let (code, body) = request(&mut client, "GET", "/index.html", &conditional, b"").await;
    assert_eq!(code, 304);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_static_range_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.txt"), b"0123456789").unwrap();

    let mut router = Router::new();
    serve_dir(&mut router, "/", dir.path(), StaticOptions::default());

    let mut client = connect(Arc::new(router));
    let headers = HeaderMap::new().with("range", "bytes=2-5");
    let (code, body) = request(&mut client, "GET", "/data.txt", &headers, b"").await;
    assert_eq!(code, 206);
    assert_eq!(body, b"2345");
    assert_eq!(
        client.headers().get("content-range"),
        Some("bytes 2-5/10")
    );
}

#[tokio::test]
async fn test_static_traversal_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut router = Router::new();
    serve_dir(&mut router, "/", dir.path(), StaticOptions::default());

    let mut client = connect(Arc::new(router));
    let (code, _) = get(&mut client, "/../secret").await;
    assert_eq!(code, 403);
}

#[tokio::test]
async fn test_static_dotfiles_ignored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), b"secret").unwrap();

    let mut router = Router::new();
    serve_dir(&mut router, "/", dir.path(), StaticOptions::default());

    let mut client = connect(Arc::new(router));
    let (code, _) = get(&mut client, "/.env").await;
    assert_eq!(code, 404);
}

#[tokio::test]
async fn test_date_and_server_headers() {
    let mut router = Router::new();
    router.get(
        "/",
        handler(|ctx| Box::pin(async move { ctx.send(b"ok".as_slice(), 200).await })),
    );

    let mut client = connect(Arc::new(router));
    let (code, _) = get(&mut client, "/").await;
    assert_eq!(code, 200);
    assert_eq!(client.headers().get("server"), Some("apphost"));
    let date = client.headers().get("date").unwrap();
    assert!(date.ends_with("GMT"));
}
