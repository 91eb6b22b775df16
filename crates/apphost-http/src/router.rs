// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Method-keyed path trie with a middleware chain.
//!
//! Route paths are `/`-separated segments: literal segments match exactly,
//! `:name` captures one segment, `*` is terminal and captures the rest.
//! Match precedence at every node is static > parameter > wildcard, with
//! captured parameters rolled back when a speculative descent fails.
//!
//! The router is immutable once built and shared as `Arc<Router>` across
//! connection tasks.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::context::Context;
use crate::engine::HttpEngine;
use crate::error::{HttpError, Result};

/// Terminal request handler.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Middleware step: runs around the rest of the chain via [`Next`].
pub type Middleware =
    Arc<dyn for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Wrap a closure into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure into a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The remainder of the middleware chain plus the terminal handler.
pub struct Next<'a> {
    chain: &'a [Middleware],
    handler: &'a Handler,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((mw, rest)) => mw(
                ctx,
                Next {
                    chain: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(ctx),
        }
    }
}

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    param: Option<ParamChild>,
    wildcard: Option<Handler>,
    handler: Option<Handler>,
}

struct ParamChild {
    name: String,
    node: Box<Node>,
}

/// Trie router plus middleware chain and error handler.
pub struct Router {
    methods: HashMap<String, Node>,
    middleware: Vec<Middleware>,
    error_handler: Option<Handler>,
    server_name: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            middleware: Vec::new(),
            error_handler: None,
            server_name: "apphost".to_string(),
        }
    }

    /// Name reported in the `server` response header.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Register a route for `method` + `path`.
    pub fn route(&mut self, method: &str, path: &str, h: Handler) -> &mut Self {
        let root = self.methods.entry(method.to_ascii_uppercase()).or_default();
        let mut node = root;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for (i, seg) in segments.iter().enumerate() {
            if *seg == "*" {
                if i + 1 != segments.len() {
                    warn!(path, "wildcard segment must be last; ignoring trailing segments");
                }
                node.wildcard = Some(h);
                return self;
            }
            if let Some(name) = seg.strip_prefix(':') {
                let param = node.param.get_or_insert_with(|| ParamChild {
                    name: name.to_string(),
                    node: Box::default(),
                });
                node = &mut param.node;
            } else {
                node = node.children.entry(seg.to_string()).or_default();
            }
        }
        node.handler = Some(h);
        self
    }

    pub fn get(&mut self, path: &str, h: Handler) -> &mut Self {
        self.route("GET", path, h)
    }

    pub fn post(&mut self, path: &str, h: Handler) -> &mut Self {
        self.route("POST", path, h)
    }

    pub fn put(&mut self, path: &str, h: Handler) -> &mut Self {
        self.route("PUT", path, h)
    }

    pub fn delete(&mut self, path: &str, h: Handler) -> &mut Self {
        self.route("DELETE", path, h)
    }

    /// Append a middleware step. Steps run in registration order.
    pub fn with_middleware(&mut self, mw: Middleware) -> &mut Self {
        self.middleware.push(mw);
        self
    }

    /// Install the error handler, run on a fresh context when a handler
    /// fails. Without one, an unsent response becomes a plain 500.
    pub fn on_error(&mut self, h: Handler) -> &mut Self {
        self.error_handler = Some(h);
        self
    }

    /// Look up a handler; returns captured parameters on success.
    pub fn find(&self, method: &str, path: &str) -> Option<(&Handler, HashMap<String, String>)> {
        let root = self.methods.get(&method.to_ascii_uppercase())?;
        let segments = split_path(path);
        let mut captured = Vec::new();
        let handler = match_node(root, &segments, &mut captured)?;
        Some((handler, captured.into_iter().collect()))
    }

    /// Serve one request/response exchange on the engine: parse, match,
    /// build a context, run the middleware chain and the handler, and
    /// apply the error policy. The engine comes back ready for
    /// [`HttpEngine::reuse`] when the exchange allows keep-alive.
    pub async fn handle(&self, mut engine: HttpEngine) -> Result<HttpEngine> {
        engine.start().await?;
        let req = engine
            .request()
            .cloned()
            .ok_or_else(|| HttpError::Protocol("server engine has no request".into()))?;

        let matched = self.find(&req.method, req.path());
        let query = parse_query(req.query().unwrap_or(""));
        let mut ctx = Context::new(engine, req.clone(), self.server_name.clone());
        ctx.query = query;

        let outcome = match matched {
            Some((h, params)) => {
                ctx.params = params;
                let next = Next {
                    chain: &self.middleware,
                    handler: h,
                };
                next.run(&mut ctx).await
            }
            None => ctx.send(b"No Route Matched", 404).await,
        };

        match outcome {
            Ok(()) => Ok(ctx.into_engine()),
            Err(e) if e.is_disconnect() => {
                // Expected peer disconnects are dropped silently.
                debug!(method = %req.method, path = %req.path(), "client disconnected");
                Ok(ctx.into_engine())
            }
            Err(e) => {
                warn!(method = %req.method, path = %req.path(), error = %e, "handler failed");
                if let Some(error_handler) = &self.error_handler {
                    let mut fresh = Context::new(ctx.into_engine(), req, self.server_name.clone());
                    fresh.state.insert(
                        "error".to_string(),
                        serde_json::Value::String(e.to_string()),
                    );
                    if let Err(e2) = (error_handler)(&mut fresh).await {
                        debug!(error = %e2, "error handler failed");
                    }
                    Ok(fresh.into_engine())
                } else {
                    if !ctx.engine_mut().sent() {
                        let _ = ctx.send_status(500, Some(&e.to_string())).await;
                    }
                    Ok(ctx.into_engine())
                }
            }
        }
    }
}

fn match_node<'a>(
    node: &'a Node,
    segments: &[String],
    captured: &mut Vec<(String, String)>,
) -> Option<&'a Handler> {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            if let Some(h) = node.handler.as_ref() {
                return Some(h);
            }
            // A wildcard also matches an empty remainder.
            if let Some(h) = node.wildcard.as_ref() {
                captured.push(("*".to_string(), String::new()));
                return Some(h);
            }
            return None;
        }
    };

    if let Some(child) = node.children.get(head.as_str()) {
        if let Some(h) = match_node(child, rest, captured) {
            return Some(h);
        }
    }
    if let Some(param) = &node.param {
        captured.push((param.name.clone(), head.clone()));
        if let Some(h) = match_node(&param.node, rest, captured) {
            return Some(h);
        }
        captured.pop();
    }
    if let Some(h) = &node.wildcard {
        captured.push(("*".to_string(), segments.join("/")));
        return Some(h);
    }
    None
}

/// Split a request path into decoded, non-empty segments.
fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect()
}

/// Parse a query string into decoded key/value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| value.to_string());
        out.insert(key, value);
    }
    out
}
