// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request handler façade.
//!
//! A [`Context`] owns the connection engine for the duration of one
//! request/response exchange and gives handlers body accessors and response
//! primitives. Every response carries `date` and `server` headers.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::{status_text, HttpEngine, RequestLine, DEFAULT_BODY_LIMIT};
use crate::error::{HttpError, Result};
use crate::headers::HeaderMap;
use crate::sse::SseEvent;
use crate::ws::WsMessage;

/// Current time formatted per RFC 7231 (IMF-fixdate).
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Per-request context handed to route handlers and middleware.
pub struct Context {
    engine: HttpEngine,
    req: RequestLine,
    /// Path parameters captured by the router (`:name` and `*`).
    pub params: HashMap<String, String>,
    /// Decoded query-string pairs.
    pub query: HashMap<String, String>,
    /// Scratch space shared along the middleware chain.
    pub state: HashMap<String, serde_json::Value>,
    server_name: String,
    body: Option<Bytes>,
    /// Cap for [`Self::bytes`].
    pub body_limit: usize,
}

impl Context {
    pub fn new(engine: HttpEngine, req: RequestLine, server_name: String) -> Self {
        Self {
            engine,
            req,
            params: HashMap::new(),
            query: HashMap::new(),
            state: HashMap::new(),
            server_name,
            body: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn req(&self) -> &RequestLine {
        &self.req
    }

    pub fn method(&self) -> &str {
        &self.req.method
    }

    pub fn path(&self) -> &str {
        self.req.path()
    }

    /// First value of a request header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.engine.headers().get(name)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Direct access to the engine, for WebSocket/SSE session loops.
    pub fn engine_mut(&mut self) -> &mut HttpEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> HttpEngine {
        self.engine
    }

    // ------------------------------------------------------------------
    // Body accessors
    // ------------------------------------------------------------------

    /// Full request body, read once and cached.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        if self.body.is_none() {
            let body = self.engine.read_body_to_end(self.body_limit).await?;
            self.body = Some(body);
        }
        Ok(self.body.clone().unwrap_or_default())
    }

    /// Request body as text.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Request body parsed as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| HttpError::Parse(format!("invalid JSON: {e}")))
    }

    // ------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------

    fn base_headers(&self) -> HeaderMap {
        HeaderMap::new()
            .with("date", http_date())
            .with("server", self.server_name.clone())
    }

    /// Write a response with extra headers merged over the base set.
    pub async fn send_with(&mut self, code: u16, extra: &HeaderMap, body: &[u8]) -> Result<()> {
        let mut headers = self.base_headers();
        for (name, value) in extra.iter() {
            headers.append(name, value);
        }
        self.engine.write_response(code, &headers, body).await
    }

    /// Plain response with the given status code.
    pub async fn send(&mut self, body: impl AsRef<[u8]>, code: u16) -> Result<()> {
        self.send_with(code, &HeaderMap::new(), body.as_ref()).await
    }

    /// JSON response (`application/json`).
    pub async fn send_json<T: Serialize>(&mut self, value: &T, code: u16) -> Result<()> {
        let body = serde_json::to_vec(value)
            .map_err(|e| HttpError::Protocol(format!("JSON encode failed: {e}")))?;
        let headers = HeaderMap::new().with("content-type", "application/json");
        self.send_with(code, &headers, &body).await
    }

    /// HTML response (`text/html`).
    pub async fn html(&mut self, body: &str, code: u16) -> Result<()> {
        let headers = HeaderMap::new().with("content-type", "text/html; charset=utf-8");
        self.send_with(code, &headers, body.as_bytes()).await
    }

    /// Redirect to `url` (default code 302 at call sites).
    pub async fn redirect(&mut self, url: &str, code: u16) -> Result<()> {
        let headers = HeaderMap::new().with("location", url);
        self.send_with(code, &headers, b"").await
    }

    /// Status-only response; the body defaults to the reason phrase.
    pub async fn send_status(&mut self, code: u16, message: Option<&str>) -> Result<()> {
        let body = message.unwrap_or_else(|| status_text(code));
        self.send(body.as_bytes(), code).await
    }

    /// Begin a streamed response body.
    ///
    /// With `Some(length)` a `content-length` is written and the returned
    /// writer enforces the declared size: over-writing fails, finishing
    /// short fails (which closes the connection). With `None` the body is
    /// `transfer-encoding: chunked` and [`BodyWriter::finish`] writes the
    /// terminating zero chunk.
    pub async fn stream(
        &mut self,
        code: u16,
        length: Option<u64>,
        extra: &HeaderMap,
    ) -> Result<BodyWriter<'_>> {
        let mut headers = self.base_headers();
        for (name, value) in extra.iter() {
            headers.append(name, value);
        }
        let mode = match length {
            Some(len) => {
                headers.set("content-length", len.to_string());
                StreamMode::Fixed { remaining: len }
            }
            None => {
                headers.set("transfer-encoding", "chunked");
                StreamMode::Chunked
            }
        };
        self.engine.write_response(code, &headers, b"").await?;
        Ok(BodyWriter {
            engine: &mut self.engine,
            mode,
        })
    }

    // ------------------------------------------------------------------
    // Protocol switches
    // ------------------------------------------------------------------

    /// Switch this response to an SSE stream.
    pub async fn sse(&mut self) -> Result<()> {
        let base = self.base_headers();
        self.engine.sse(&base).await
    }

    /// Emit one SSE event after [`Self::sse`].
    pub async fn send_event(&mut self, event: &SseEvent) -> Result<()> {
        self.engine.send_event(event).await
    }

    /// Complete a WebSocket handshake.
    pub async fn upgrade(&mut self) -> Result<()> {
        self.engine.upgrade().await
    }

    /// Receive the next WebSocket message after [`Self::upgrade`].
    pub async fn ws_recv(&mut self) -> Result<Option<WsMessage>> {
        self.engine.ws_recv().await
    }
}

enum StreamMode {
    Fixed { remaining: u64 },
    Chunked,
}

/// Writer for a streamed response body. See [`Context::stream`].
pub struct BodyWriter<'a> {
    engine: &'a mut HttpEngine,
    mode: StreamMode,
}

impl BodyWriter<'_> {
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.mode {
            StreamMode::Fixed { remaining } => {
                if (data.len() as u64) > *remaining {
                    self.engine.mark_error();
                    return Err(HttpError::Protocol(
                        "stream wrote past declared content-length".into(),
                    ));
                }
                *remaining -= data.len() as u64;
                self.engine.write_raw(data).await
            }
            StreamMode::Chunked => self.engine.write_chunk(data).await,
        }
    }

    /// Finish the body. A fixed-length stream ending short fails here and
    /// poisons the connection, so the peer sees a close instead of hanging.
    pub async fn finish(self) -> Result<()> {
        match self.mode {
            StreamMode::Fixed { remaining } => {
                if remaining > 0 {
                    self.engine.mark_error();
                    return Err(HttpError::Protocol(format!(
                        "stream closed {remaining} bytes short of content-length"
                    )));
                }
                Ok(())
            }
            StreamMode::Chunked => self.engine.end_chunked(None).await,
        }
    }
}
