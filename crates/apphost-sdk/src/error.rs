// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-specific error types.

use thiserror::Error;

/// Result type using SdkError
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors surfaced to and from user modules.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The app's cancellation token fired while a wrapped await was pending.
    #[error("App stopped")]
    Cancelled,

    /// Failure reported by user module code.
    #[error("module error: {0}")]
    Module(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SdkError {
    /// True when this error is the cancellation signal rather than a real
    /// failure. Lifecycle code uses this to keep clean stops out of
    /// `last_error`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SdkError::Cancelled)
    }

    /// Build a module error from any displayable value.
    pub fn module(message: impl std::fmt::Display) -> Self {
        SdkError::Module(message.to_string())
    }
}
