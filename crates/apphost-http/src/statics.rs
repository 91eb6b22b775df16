// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static file serving with conditional requests and ranges.
//!
//! Registers a wildcard GET route under a prefix. Resolution rejects `..`
//! segments, applies the dotfiles policy, resolves directories to an index
//! file (redirecting when the trailing slash is missing), answers
//! `If-None-Match`/`If-Modified-Since` with 304, and serves single byte
//! ranges with 206, streaming in 16 KiB chunks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::context::Context;
use crate::error::Result;
use crate::headers::HeaderMap;
use crate::router::{handler, Handler, Router};

/// Streaming chunk size for file bodies.
const FILE_CHUNK: usize = 16 * 1024;

/// Policy for path segments starting with a dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dotfiles {
    Allow,
    Deny,
    Ignore,
}

/// Options for [`serve_dir`].
#[derive(Debug, Clone)]
pub struct StaticOptions {
    /// File served for directory requests.
    pub index: String,
    pub dotfiles: Dotfiles,
    /// When set, responses carry `cache-control: public, max-age=N`.
    pub max_age: Option<u64>,
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self {
            index: "index.html".to_string(),
            dotfiles: Dotfiles::Ignore,
            max_age: None,
        }
    }
}

/// Mount a static directory under `prefix`.
pub fn serve_dir(router: &mut Router, prefix: &str, root: impl Into<PathBuf>, options: StaticOptions) {
    let pattern = format!("{}/*", prefix.trim_end_matches('/'));
    router.get(&pattern, static_handler(root.into(), options));
}

/// Build the wildcard handler for a static root.
pub fn static_handler(root: PathBuf, options: StaticOptions) -> Handler {
    let cfg = Arc::new((root, options));
    handler(move |ctx| {
        let cfg = cfg.clone();
        Box::pin(async move { serve_file(ctx, &cfg.0, &cfg.1).await })
    })
}

async fn serve_file(ctx: &mut Context, root: &Path, options: &StaticOptions) -> Result<()> {
    let rel = ctx.param("*").unwrap_or("").to_string();

    for segment in rel.split('/').filter(|s| !s.is_empty()) {
        if segment.contains("..") {
            return ctx.send_status(403, Some("Forbidden")).await;
        }
        if segment.starts_with('.') {
            match options.dotfiles {
                Dotfiles::Allow => {}
                Dotfiles::Deny => return ctx.send_status(403, Some("Forbidden")).await,
                Dotfiles::Ignore => return ctx.send_status(404, None).await,
            }
        }
    }

    let mut full = root.join(&rel);
    let mut meta = match tokio::fs::metadata(&full).await {
        Ok(meta) => meta,
        Err(_) => return ctx.send_status(404, None).await,
    };

    if meta.is_dir() {
        if !ctx.path().ends_with('/') {
            let location = format!("{}/", ctx.path());
            return ctx.redirect(&location, 302).await;
        }
        full = full.join(&options.index);
        meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(_) => return ctx.send_status(404, None).await,
        };
    }

    let size = meta.len();
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let modified_dt: DateTime<Utc> = modified.into();
    let mtime_ms = modified_dt.timestamp_millis().max(0);
    let etag = format!("\"{size}-{mtime_ms}\"");

    let mut headers = HeaderMap::new()
        .with("etag", etag.clone())
        .with(
            "last-modified",
            modified_dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    if let Some(max_age) = options.max_age {
        headers.set("cache-control", format!("public, max-age={max_age}"));
    }

    if let Some(if_none_match) = ctx.header("if-none-match") {
        if if_none_match
            .split(',')
            .any(|tag| tag.trim() == etag || tag.trim() == "*")
        {
            return ctx.send_with(304, &headers, b"").await;
        }
    } else if let Some(if_modified_since) = ctx.header("if-modified-since") {
        if let Ok(since) = DateTime::parse_from_rfc2822(if_modified_since) {
            // Header precision is one second.
            if modified_dt.timestamp() <= since.timestamp() {
                return ctx.send_with(304, &headers, b"").await;
            }
        }
    }

    headers.set("content-type", mime_for(&full));

    let range = ctx
        .header("range")
        .and_then(|value| parse_range(value, size));
    let (code, start, len) = match range {
        Some((a, b)) => {
            headers.set("content-range", format!("bytes {a}-{b}/{size}"));
            (206, a, b - a + 1)
        }
        None => (200, 0, size),
    };

    let mut file = match tokio::fs::File::open(&full).await {
        Ok(file) => file,
        Err(_) => return ctx.send_status(404, None).await,
    };
    if start > 0 {
        file.seek(std::io::SeekFrom::Start(start)).await?;
    }

    let mut writer = ctx.stream(code, Some(len), &headers).await?;
    let mut remaining = len;
    let mut buf = vec![0u8; FILE_CHUNK];
    while remaining > 0 {
        let want = remaining.min(FILE_CHUNK as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n]).await?;
        remaining -= n as u64;
    }
    writer.finish().await
}

/// Parse a single `bytes=a-b` range. Valid iff `0 <= a <= b < size`.
fn parse_range(value: &str, size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (a, b) = spec.split_once('-')?;
    let a: u64 = a.trim().parse().ok()?;
    let b: u64 = b.trim().parse().ok()?;
    if a <= b && b < size {
        Some((a, b))
    } else {
        None
    }
}

/// Content type by file extension.
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-4", 10), Some((0, 4)));
        assert_eq!(parse_range("bytes=5-9", 10), Some((5, 9)));
        assert_eq!(parse_range("bytes=5-10", 10), None); // past end
        assert_eq!(parse_range("bytes=6-5", 10), None); // inverted
        assert_eq!(parse_range("bytes=-5", 10), None); // suffix form unsupported
        assert_eq!(parse_range("chunks=0-4", 10), None);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(mime_for(Path::new("app.wasm")), "application/wasm");
        assert_eq!(mime_for(Path::new("no_ext")), "application/octet-stream");
    }
}
