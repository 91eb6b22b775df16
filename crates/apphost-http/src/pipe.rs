// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buffered framed reads over a reliable byte stream.
//!
//! [`Pipe`] owns the underlying connection and a compacting read buffer, and
//! provides the framed read primitives the HTTP engine is built on:
//! exact-length reads, line reads, delimiter reads, peek and skip. Writes are
//! unbuffered and delegated straight to the stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HttpError, Result};

/// Default size of the backing read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default maximum line length for [`Pipe::read_line`].
pub const DEFAULT_LINE_LIMIT: usize = 65536;

/// Socket-level tuning applied through [`Pipe::set_options`].
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeOptions {
    /// TCP keep-alive probes on the underlying socket.
    pub keep_alive: Option<bool>,
    /// Nagle's algorithm off (`TCP_NODELAY`).
    pub no_delay: Option<bool>,
}

/// Any reliable bidirectional byte stream (TCP socket, in-memory duplex).
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Apply socket-level options. Streams without a socket ignore them.
    fn set_options(&self, _options: PipeOptions) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteStream for tokio::net::TcpStream {
    fn set_options(&self, options: PipeOptions) -> std::io::Result<()> {
        if let Some(no_delay) = options.no_delay {
            self.set_nodelay(no_delay)?;
        }
        if let Some(keep_alive) = options.keep_alive {
            socket2::SockRef::from(self).set_keepalive(keep_alive)?;
        }
        Ok(())
    }
}

impl ByteStream for tokio::io::DuplexStream {}

/// Buffered reader/writer over a byte stream.
///
/// Reads go through a backing buffer: on each fill, unread bytes are
/// compacted to offset zero and the free tail is filled from the stream.
/// The buffer grows when a framed read spans more than its current
/// capacity (long lines are still bounded by the caller-supplied limit).
pub struct Pipe {
    stream: Box<dyn ByteStream>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
}

impl Pipe {
    /// Create a pipe with the default buffer size.
    pub fn new(stream: impl ByteStream + 'static) -> Self {
        Self::with_capacity(stream, DEFAULT_BUFFER_SIZE)
    }

    /// Create a pipe with a custom backing buffer size.
    pub fn with_capacity(stream: impl ByteStream + 'static, capacity: usize) -> Self {
        Self {
            stream: Box::new(stream),
            buf: vec![0u8; capacity.max(1)],
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// Number of bytes currently buffered and unread.
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Whether the stream has reached end-of-file.
    pub fn is_eof(&self) -> bool {
        self.eof && self.buffered() == 0
    }

    /// Compact the buffer and read once from the stream.
    ///
    /// Returns the number of bytes read; zero means EOF.
    async fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            // A framed read outgrew the buffer; double it.
            let grown = self.buf.len() * 2;
            self.buf.resize(grown, 0);
        }
        let n = self.stream.read(&mut self.buf[self.end..]).await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.end += n;
        }
        Ok(n)
    }

    /// Consume `n` buffered bytes. Caller must ensure they are available.
    fn take(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.buffered());
        let out = Bytes::copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        out
    }

    /// Read exactly `n` bytes.
    ///
    /// On EOF mid-read, whatever was read is returned (possibly shorter than
    /// `n`). Returns `None` only when no bytes were available at all.
    pub async fn read_exact(&mut self, n: usize) -> Result<Option<Bytes>> {
        if n == 0 {
            return Ok(Some(Bytes::new()));
        }
        while self.buffered() < n {
            if self.fill().await? == 0 {
                break;
            }
        }
        let have = self.buffered().min(n);
        if have == 0 {
            return Ok(None);
        }
        Ok(Some(self.take(have)))
    }

    /// Read one line with the default length limit. See [`Self::read_line_limit`].
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.read_line_limit(DEFAULT_LINE_LIMIT).await
    }

    /// Read text up to (but excluding) the next `\n`, stripping a preceding
    /// `\r`. On EOF with unterminated bytes, those bytes form the final
    /// line. Fails with [`HttpError::LineTooLong`] if no terminator shows up
    /// within `max` bytes.
    pub async fn read_line_limit(&mut self, max: usize) -> Result<Option<String>> {
        let mut searched = 0;
        loop {
            let window = &self.buf[self.start..self.end];
            if let Some(pos) = window[searched..].iter().position(|&b| b == b'\n') {
                let abs = searched + pos;
                let mut line = self.take(abs + 1);
                line.truncate(abs);
                if line.ends_with(b"\r") {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            searched = window.len();
            if searched > max {
                return Err(HttpError::LineTooLong(max));
            }
            if self.fill().await? == 0 {
                if self.buffered() == 0 {
                    return Ok(None);
                }
                let rest = self.take(self.buffered());
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
        }
    }

    /// Read bytes up to (but excluding) an arbitrary non-empty delimiter,
    /// consuming the delimiter. On EOF the remaining bytes are returned as
    /// the final chunk; `None` when nothing was left.
    pub async fn read_until(&mut self, delim: &[u8], max: usize) -> Result<Option<Bytes>> {
        if delim.is_empty() {
            return Err(HttpError::InvalidState("read_until requires a delimiter"));
        }
        loop {
            let window = &self.buf[self.start..self.end];
            if window.len() >= delim.len() {
                if let Some(pos) = window.windows(delim.len()).position(|w| w == delim) {
                    let mut out = self.take(pos + delim.len());
                    out.truncate(pos);
                    return Ok(Some(out));
                }
            }
            // Everything before the last |delim|-1 bytes can no longer start
            // a delimiter, so the searched prefix is bounded by max.
            if window.len().saturating_sub(delim.len() - 1) > max {
                return Err(HttpError::LineTooLong(max));
            }
            if self.fill().await? == 0 {
                if self.buffered() == 0 {
                    return Ok(None);
                }
                let rest = self.take(self.buffered());
                return Ok(Some(rest));
            }
        }
    }

    /// Read with optional size: `size > 0` behaves like [`Self::read_exact`];
    /// `size == 0` drains whatever is buffered, or one fill's worth.
    pub async fn read_any(&mut self, size: usize) -> Result<Option<Bytes>> {
        if size > 0 {
            return self.read_exact(size).await;
        }
        if self.buffered() == 0 && self.fill().await? == 0 {
            return Ok(None);
        }
        let n = self.buffered();
        Ok(Some(self.take(n)))
    }

    /// Look at the next `n` bytes without consuming them. The returned slice
    /// may be shorter on EOF.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        while self.buffered() < n {
            if self.fill().await? == 0 {
                break;
            }
        }
        let have = self.buffered().min(n);
        Ok(&self.buf[self.start..self.start + have])
    }

    /// Discard up to `n` bytes, returning how many were skipped.
    pub async fn skip(&mut self, n: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < n {
            if self.buffered() == 0 && self.fill().await? == 0 {
                break;
            }
            let step = self.buffered().min(n - skipped);
            self.take(step);
            skipped += step;
        }
        Ok(skipped)
    }

    /// Write raw bytes, unbuffered.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Write text followed by CRLF.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut out = Vec::with_capacity(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.write_all(&out).await
    }

    /// Apply socket-level options (`keep_alive`, `no_delay`) to the
    /// underlying stream. A no-op for streams without a socket.
    pub fn set_options(&self, options: PipeOptions) -> Result<()> {
        self.stream.set_options(options)?;
        Ok(())
    }

    /// Shut down the write half of the stream. Buffered input stays
    /// readable.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Close the pipe: shut down the write half and stop serving reads.
    /// Dropping the pipe releases the connection itself.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        self.eof = true;
        self.start = 0;
        self.end = 0;
        Ok(())
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("buffered", &self.buffered())
            .field("capacity", &self.buf.len())
            .field("eof", &self.eof)
            .finish()
    }
}
