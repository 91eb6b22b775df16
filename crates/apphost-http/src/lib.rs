// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP/1.1 + WebSocket + SSE engine and trie router for apphost.
//!
//! The pieces, bottom up:
//!
//! - [`pipe::Pipe`]: buffered framed reads (exact, line, until-delimiter,
//!   peek, skip) over any reliable byte stream.
//! - [`engine::HttpEngine`]: role-tagged HTTP/1.1 state machine: request/
//!   status line, case-insensitive headers, fixed and chunked bodies with
//!   trailers, keep-alive via [`engine::HttpEngine::reuse`], and in-band
//!   switches to WebSocket (RFC 6455) and Server-Sent Events.
//! - [`router::Router`]: method-keyed path trie (static > `:param` > `*`)
//!   with a middleware chain, plus [`statics`] for file serving with ETag /
//!   Last-Modified / Range support.
//! - [`context::Context`]: the per-request façade handlers work against.
//! - [`server`]: the TCP accept loop wiring it all together.
//!
//! One request is in flight per connection at a time; pipelining is not
//! supported.

pub mod context;
pub mod engine;
pub mod error;
pub mod headers;
pub mod pipe;
pub mod router;
pub mod server;
pub mod sse;
pub mod statics;
pub mod ws;

pub use context::{BodyWriter, Context};
pub use engine::{HttpEngine, Protocol, ReadState, RequestLine, Role, StatusLine};
pub use error::{HttpError, Result};
pub use headers::HeaderMap;
pub use pipe::{ByteStream, Pipe, PipeOptions};
pub use router::{handler, middleware, Handler, Middleware, Next, Router};
pub use sse::SseEvent;
pub use statics::{serve_dir, Dotfiles, StaticOptions};
pub use ws::WsMessage;
