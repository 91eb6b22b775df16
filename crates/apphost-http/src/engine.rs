// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP/1.1 connection state machine.
//!
//! [`HttpEngine`] drives one connection through request/status line, headers,
//! body (fixed-length or chunked with trailers) and, in-band, upgrades to
//! WebSocket or SSE. The engine is role-tagged: a server engine parses
//! request lines and writes responses, a client engine writes requests and
//! parses status lines. One request/response pair is in flight at a time;
//! [`HttpEngine::reuse`] rearms the engine for HTTP keep-alive.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{HttpError, Result};
use crate::headers::HeaderMap;
use crate::pipe::Pipe;
use crate::sse::{self, SseEvent};
use crate::ws::{self, WsChannel, WsMessage};

/// Maximum accepted request/status/header line length.
pub const MAX_LINE_LENGTH: usize = 65536;

/// Upper bound on bytes returned by a single fixed-length body read.
pub const BODY_READ_CHUNK: u64 = 65536;

/// Default cap for [`HttpEngine::read_body_to_end`].
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Which side of the connection this engine speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Application protocol currently carried by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Ws,
    Sse,
}

/// Read-side state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    StatusLine,
    Headers,
    Body,
    Trailer,
    Done,
    Error,
    Upgraded,
}

/// Parsed request line (server role).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    /// Path portion of the target, without query string.
    pub fn path(&self) -> &str {
        self.target.split(['?', '#']).next().unwrap_or("")
    }

    /// Raw query string, if present.
    pub fn query(&self) -> Option<&str> {
        let rest = self.target.splitn(2, '?').nth(1)?;
        Some(rest.split('#').next().unwrap_or(rest))
    }
}

/// Parsed status line (client role).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

/// Standard reason phrase for a status code.
pub fn status_text(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Per-connection HTTP/1.1 + WebSocket + SSE state machine.
pub struct HttpEngine {
    pipe: Pipe,
    role: Role,
    protocol: Protocol,
    read_state: ReadState,
    headers: HeaderMap,
    trailers: HeaderMap,
    request: Option<RequestLine>,
    status: Option<StatusLine>,
    body_remaining: u64,
    chunked: bool,
    expect_trailer: bool,
    keep_alive: bool,
    sent: bool,
    ws: WsChannel,
}

impl HttpEngine {
    /// Create a server-side engine over a pipe.
    pub fn server(pipe: Pipe) -> Self {
        Self::new(pipe, Role::Server)
    }

    /// Create a client-side engine over a pipe.
    pub fn client(pipe: Pipe) -> Self {
        Self::new(pipe, Role::Client)
    }

    fn new(pipe: Pipe, role: Role) -> Self {
        Self {
            pipe,
            role,
            protocol: Protocol::Http,
            read_state: ReadState::Idle,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            request: None,
            status: None,
            body_remaining: 0,
            chunked: false,
            expect_trailer: false,
            keep_alive: true,
            sent: false,
            ws: WsChannel::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    /// Headers of the incoming message, lowercased keys.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trailer headers collected after a chunked body, if any.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn request(&self) -> Option<&RequestLine> {
        self.request.as_ref()
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether the single response (server) or request (client) was written.
    pub fn sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn pipe_mut(&mut self) -> &mut Pipe {
        &mut self.pipe
    }

    /// Read the first line and headers of the incoming message and decide
    /// body framing and protocol. Valid only from `Idle`.
    pub async fn start(&mut self) -> Result<()> {
        let r = self.start_inner().await;
        self.note_err(r)
    }

    async fn start_inner(&mut self) -> Result<()> {
        if self.read_state != ReadState::Idle {
            return Err(HttpError::InvalidState("start() requires IDLE"));
        }
        self.read_state = ReadState::StatusLine;

        let line = self
            .pipe
            .read_line_limit(MAX_LINE_LENGTH)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;

        match self.role {
            Role::Server => {
                let mut parts = line.split_whitespace();
                let (method, target, version) =
                    match (parts.next(), parts.next(), parts.next(), parts.next()) {
                        (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/") => (m, t, v),
                        _ => {
                            return Err(HttpError::Parse(format!("malformed request line: {line:?}")))
                        }
                    };
                self.request = Some(RequestLine {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                });
            }
            Role::Client => {
                let mut parts = line.splitn(3, ' ');
                let version = parts.next().unwrap_or("");
                let code = parts
                    .next()
                    .and_then(|c| c.parse::<u16>().ok())
                    .ok_or_else(|| HttpError::Parse(format!("malformed status line: {line:?}")))?;
                if !version.starts_with("HTTP/") {
                    return Err(HttpError::Parse(format!("malformed status line: {line:?}")));
                }
                self.status = Some(StatusLine {
                    version: version.to_string(),
                    code,
                    reason: parts.next().unwrap_or("").to_string(),
                });
            }
        }

        self.read_state = ReadState::Headers;
        loop {
            let line = self
                .pipe
                .read_line_limit(MAX_LINE_LENGTH)
                .await?
                .ok_or(HttpError::ConnectionClosed)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::Parse(format!("malformed header line: {line:?}")))?;
            self.headers.append(name.trim(), value.trim());
        }

        self.analyze_headers()
    }

    /// Decide body framing, protocol switches and keep-alive from the
    /// headers just read.
    fn analyze_headers(&mut self) -> Result<()> {
        let version = match self.role {
            Role::Server => self.request.as_ref().map(|r| r.version.clone()),
            Role::Client => self.status.as_ref().map(|s| s.version.clone()),
        }
        .unwrap_or_default();

        self.keep_alive = if version == "HTTP/1.0" {
            self.headers.has_token("connection", "keep-alive")
        } else {
            !self.headers.has_token("connection", "close")
        };

        let wants_ws = self.headers.has_token("connection", "upgrade")
            && self
                .headers
                .get("upgrade")
                .map(|u| u.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false);
        if wants_ws {
            self.protocol = Protocol::Ws;
            self.read_state = ReadState::Upgraded;
            return Ok(());
        }

        let is_sse = self.role == Role::Client
            && self
                .headers
                .get("content-type")
                .map(|c| c.starts_with("text/event-stream"))
                .unwrap_or(false);
        if is_sse {
            self.protocol = Protocol::Sse;
            self.read_state = ReadState::Upgraded;
            return Ok(());
        }

        if self.headers.has_token("transfer-encoding", "chunked") {
            self.chunked = true;
            self.expect_trailer = self.headers.contains("trailer");
            self.read_state = ReadState::Body;
            return Ok(());
        }

        if let Some(cl) = self.headers.get("content-length") {
            let n: u64 = cl
                .trim()
                .parse()
                .map_err(|_| HttpError::Parse(format!("invalid content-length: {cl:?}")))?;
            self.body_remaining = n;
            self.read_state = if n == 0 { ReadState::Done } else { ReadState::Body };
            return Ok(());
        }

        self.read_state = ReadState::Done;
        Ok(())
    }

    /// Read the next piece of the message body. Returns `None` once the body
    /// is complete (state `Done`). Fixed-length bodies come back in chunks of
    /// at most [`BODY_READ_CHUNK`] bytes; chunked bodies come back one chunk
    /// at a time with trailers collected into [`Self::trailers`].
    pub async fn read_body(&mut self) -> Result<Option<Bytes>> {
        let r = self.read_body_inner().await;
        self.note_err(r)
    }

    async fn read_body_inner(&mut self) -> Result<Option<Bytes>> {
        match self.read_state {
            ReadState::Done => Ok(None),
            ReadState::Body => {
                if self.chunked {
                    self.read_chunk().await
                } else {
                    self.read_fixed().await
                }
            }
            _ => Err(HttpError::InvalidState("read_body() requires BODY")),
        }
    }

    async fn read_fixed(&mut self) -> Result<Option<Bytes>> {
        let want = self.body_remaining.min(BODY_READ_CHUNK) as usize;
        let data = self
            .pipe
            .read_exact(want)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if data.len() < want {
            return Err(HttpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF inside fixed-length body",
            )));
        }
        self.body_remaining -= data.len() as u64;
        if self.body_remaining == 0 {
            self.read_state = ReadState::Done;
        }
        Ok(Some(data))
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let line = self
            .pipe
            .read_line_limit(MAX_LINE_LENGTH)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        // Chunk extensions after ';' are ignored.
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| HttpError::Parse(format!("invalid chunk size: {size_str:?}")))?;

        if size == 0 {
            if self.expect_trailer {
                self.read_state = ReadState::Trailer;
                loop {
                    let line = self
                        .pipe
                        .read_line_limit(MAX_LINE_LENGTH)
                        .await?
                        .ok_or(HttpError::ConnectionClosed)?;
                    if line.is_empty() {
                        break;
                    }
                    let (name, value) = line.split_once(':').ok_or_else(|| {
                        HttpError::Parse(format!("malformed trailer line: {line:?}"))
                    })?;
                    self.trailers.append(name.trim(), value.trim());
                }
            } else {
                let line = self
                    .pipe
                    .read_line_limit(MAX_LINE_LENGTH)
                    .await?
                    .ok_or(HttpError::ConnectionClosed)?;
                if !line.is_empty() {
                    return Err(HttpError::Parse(
                        "expected empty line after final chunk".to_string(),
                    ));
                }
            }
            self.read_state = ReadState::Done;
            return Ok(None);
        }

        let data = self
            .pipe
            .read_exact(size as usize)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if (data.len() as u64) < size {
            return Err(HttpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF inside chunk",
            )));
        }
        let line = self
            .pipe
            .read_line_limit(MAX_LINE_LENGTH)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if !line.is_empty() {
            return Err(HttpError::Parse("missing CRLF after chunk".to_string()));
        }
        Ok(Some(data))
    }

    /// Drain the whole body into one buffer, failing if it exceeds `limit`.
    pub async fn read_body_to_end(&mut self, limit: usize) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read_body().await? {
            if out.len() + chunk.len() > limit {
                let r = Err(HttpError::BodyTooLarge(limit));
                return self.note_err(r);
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Write a full response: status line, headers (lowercased), body.
    ///
    /// For plain HTTP, a `content-length` header is injected when neither
    /// `content-length` nor `transfer-encoding` was supplied. Fails with
    /// [`HttpError::AlreadySent`] on a second call.
    pub async fn write_response(
        &mut self,
        code: u16,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        if self.role != Role::Server {
            return Err(HttpError::Protocol("write_response() is server-side".into()));
        }
        let first = format!("HTTP/1.1 {} {}", code, status_text(code));
        self.write_message(first, headers, body).await
    }

    /// Write a full request: request line, headers (lowercased), body.
    pub async fn write_request(
        &mut self,
        method: &str,
        target: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        if self.role != Role::Client {
            return Err(HttpError::Protocol("write_request() is client-side".into()));
        }
        let first = format!("{method} {target} HTTP/1.1");
        self.write_message(first, headers, body).await
    }

    async fn write_message(&mut self, first: String, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        if self.sent {
            return Err(HttpError::AlreadySent);
        }
        self.sent = true;

        let mut head = String::with_capacity(256);
        head.push_str(&first);
        head.push_str("\r\n");
        for (name, value) in headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if self.protocol == Protocol::Http
            && !headers.contains("content-length")
            && !headers.contains("transfer-encoding")
        {
            head.push_str(&format!("content-length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        let r = self.write_raw(head.as_bytes()).await;
        self.note_err(r)?;
        if !body.is_empty() {
            let r = self.write_raw(body).await;
            self.note_err(r)?;
        }
        Ok(())
    }

    /// Write one chunk of a `transfer-encoding: chunked` body. Empty input
    /// is a no-op (an empty chunk would terminate the stream).
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut out = Vec::with_capacity(data.len() + 16);
        out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        let r = self.write_raw(&out).await;
        self.note_err(r)
    }

    /// Terminate a chunked body with the zero chunk and optional trailers.
    pub async fn end_chunked(&mut self, trailers: Option<&HeaderMap>) -> Result<()> {
        let mut out = String::from("0\r\n");
        if let Some(trailers) = trailers {
            for (name, value) in trailers.iter() {
                out.push_str(name);
                out.push_str(": ");
                out.push_str(value);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
        let r = self.write_raw(out.as_bytes()).await;
        self.note_err(r)
    }

    pub(crate) async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.pipe.write_all(data).await
    }

    /// Poison the engine so the connection is torn down instead of reused.
    /// Used when a streamed body ends short of its declared length.
    pub(crate) fn mark_error(&mut self) {
        self.read_state = ReadState::Error;
    }

    /// Rearm the engine for the next request on the same connection.
    ///
    /// Valid only from `Done` after a response was sent; this is the
    /// keep-alive path.
    pub fn reuse(&mut self) -> Result<()> {
        if self.read_state != ReadState::Done {
            return Err(HttpError::InvalidState("reuse() requires DONE"));
        }
        if !self.sent {
            return Err(HttpError::Protocol(
                "reuse() before a response was sent".into(),
            ));
        }
        if self.protocol != Protocol::Http {
            return Err(HttpError::Protocol("reuse() after protocol switch".into()));
        }
        self.read_state = ReadState::Idle;
        self.sent = false;
        self.headers.clear();
        self.trailers.clear();
        self.request = None;
        self.status = None;
        self.body_remaining = 0;
        self.chunked = false;
        self.expect_trailer = false;
        Ok(())
    }

    /// Close the underlying connection.
    pub async fn close(&mut self) -> Result<()> {
        self.pipe.close().await
    }

    fn note_err<T>(&mut self, r: Result<T>) -> Result<T> {
        if r.is_err() && self.read_state != ReadState::Upgraded {
            self.read_state = ReadState::Error;
        }
        r
    }

    // ------------------------------------------------------------------
    // WebSocket
    // ------------------------------------------------------------------

    /// Complete the server side of a WebSocket handshake (writes the 101
    /// response with `sec-websocket-accept`). The incoming request must have
    /// asked for the upgrade.
    pub async fn upgrade(&mut self) -> Result<()> {
        if self.role != Role::Server {
            return Err(HttpError::Protocol("upgrade() is server-side".into()));
        }
        if self.sent {
            return Err(HttpError::AlreadySent);
        }
        if self.protocol != Protocol::Ws {
            return Err(HttpError::Protocol(
                "request did not ask for a websocket upgrade".into(),
            ));
        }
        let key = self
            .headers
            .get("sec-websocket-key")
            .ok_or_else(|| HttpError::Parse("missing sec-websocket-key".into()))?;
        let accept = ws::accept_key(key);
        self.sent = true;

        let head = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             upgrade: websocket\r\n\
             connection: Upgrade\r\n\
             sec-websocket-accept: {accept}\r\n\r\n"
        );
        let r = self.write_raw(head.as_bytes()).await;
        self.note_err(r)?;
        debug!("websocket upgrade complete");
        Ok(())
    }

    /// Receive the next complete WebSocket message, handling control frames
    /// and fragmentation inline. `None` once the peer closed the stream.
    pub async fn ws_recv(&mut self) -> Result<Option<WsMessage>> {
        if self.protocol != Protocol::Ws {
            return Err(HttpError::Protocol("connection is not websocket".into()));
        }
        ws::recv_message(&mut self.pipe, &mut self.ws, self.role).await
    }

    /// Send a WebSocket text message.
    pub async fn ws_send_text(&mut self, text: &str) -> Result<()> {
        self.ws_send(ws::Opcode::Text, text.as_bytes()).await
    }

    /// Send a WebSocket binary message.
    pub async fn ws_send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.ws_send(ws::Opcode::Binary, data).await
    }

    /// Send a WebSocket ping.
    pub async fn ws_send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.ws_send(ws::Opcode::Ping, payload).await
    }

    /// Send a close frame. Idempotent per connection.
    pub async fn ws_send_close(&mut self, code: u16) -> Result<()> {
        if self.ws.close_sent {
            return Ok(());
        }
        self.ws.close_sent = true;
        let payload = code.to_be_bytes();
        self.ws_send(ws::Opcode::Close, &payload).await
    }

    async fn ws_send(&mut self, opcode: ws::Opcode, payload: &[u8]) -> Result<()> {
        if self.protocol != Protocol::Ws {
            return Err(HttpError::Protocol("connection is not websocket".into()));
        }
        ws::write_frame(&mut self.pipe, true, opcode, payload, self.role).await
    }

    // ------------------------------------------------------------------
    // Server-Sent Events
    // ------------------------------------------------------------------

    /// Switch the response to an SSE stream: writes a 200 with
    /// `content-type: text/event-stream` plus the supplied extra headers and
    /// marks the connection upgraded.
    pub async fn sse(&mut self, extra: &HeaderMap) -> Result<()> {
        if self.role != Role::Server {
            return Err(HttpError::Protocol("sse() is server-side".into()));
        }
        if self.sent {
            return Err(HttpError::AlreadySent);
        }
        self.protocol = Protocol::Sse;
        let mut headers = extra.clone();
        headers.set("content-type", "text/event-stream");
        headers.set("cache-control", "no-cache");
        headers.set("connection", "keep-alive");
        self.write_response(200, &headers, b"").await?;
        self.read_state = ReadState::Upgraded;
        Ok(())
    }

    /// Emit one SSE event on an upgraded stream.
    pub async fn send_event(&mut self, event: &SseEvent) -> Result<()> {
        if self.protocol != Protocol::Sse {
            return Err(HttpError::Protocol("connection is not event-stream".into()));
        }
        let encoded = event.encode();
        self.write_raw(encoded.as_bytes()).await
    }

    /// Shorthand for [`Self::send_event`].
    pub async fn send_sse(
        &mut self,
        data: &str,
        event: Option<&str>,
        id: Option<&str>,
    ) -> Result<()> {
        let ev = SseEvent {
            event: event.map(str::to_string),
            id: id.map(str::to_string),
            retry: None,
            data: data.to_string(),
        };
        self.send_event(&ev).await
    }

    /// Client side: read the next SSE event from an upgraded stream.
    /// `None` when the server closed the stream.
    pub async fn read_event(&mut self) -> Result<Option<SseEvent>> {
        if self.protocol != Protocol::Sse {
            return Err(HttpError::Protocol("connection is not event-stream".into()));
        }
        sse::read_event(&mut self.pipe).await
    }
}

impl std::fmt::Debug for HttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngine")
            .field("role", &self.role)
            .field("protocol", &self.protocol)
            .field("read_state", &self.read_state)
            .field("keep_alive", &self.keep_alive)
            .field("sent", &self.sent)
            .finish()
    }
}
