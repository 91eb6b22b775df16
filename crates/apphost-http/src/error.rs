// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the HTTP/WebSocket/SSE engine.

use thiserror::Error;

/// Result type using HttpError
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors that can occur while reading or writing a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("response already sent")]
    AlreadySent,

    #[error("operation invalid in current state: {0}")]
    InvalidState(&'static str),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u64),

    #[error("body exceeds limit of {0} bytes")]
    BodyTooLarge(usize),
}

impl HttpError {
    /// True for errors that mean the peer went away. These are expected on
    /// long-lived connections and are dropped silently at the connection
    /// boundary instead of being logged as failures.
    pub fn is_disconnect(&self) -> bool {
        match self {
            HttpError::ConnectionClosed => true,
            HttpError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(HttpError::ConnectionClosed.is_disconnect());
        assert!(
            HttpError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x"))
                .is_disconnect()
        );
        assert!(!HttpError::Parse("bad".to_string()).is_disconnect());
        assert!(!HttpError::AlreadySent.is_disconnect());
    }
}
