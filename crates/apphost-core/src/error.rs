// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for apphost-core.
//!
//! Provides a unified error type that maps to API status codes.

use std::fmt;

use apphost_sdk::AppState;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during lifecycle and API processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// App was not found in the registry.
    AppNotFound {
        /// The app name that was not found.
        name: String,
    },

    /// App already exists (duplicate registration).
    AppAlreadyExists {
        /// The app name that already exists.
        name: String,
    },

    /// App is in an invalid state for the requested operation.
    InvalidAppState {
        /// The app name.
        name: String,
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the app was in.
        state: AppState,
    },

    /// Module source could not be loaded or checked.
    ModuleLoad {
        /// The app name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// A module lifecycle hook failed.
    ModuleFailed {
        /// The app name.
        name: String,
        /// Which hook failed (`init`, `run`, `stop`).
        hook: &'static str,
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Manifest file could not be read or written.
    ManifestError {
        /// The manifest path.
        path: String,
        /// Error details.
        details: String,
    },

    /// Filesystem operation failed.
    IoError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AppNotFound { .. } => "APP_NOT_FOUND",
            Self::AppAlreadyExists { .. } => "APP_ALREADY_EXISTS",
            Self::InvalidAppState { .. } => "INVALID_APP_STATE",
            Self::ModuleLoad { .. } => "MODULE_LOAD_FAILED",
            Self::ModuleFailed { .. } => "MODULE_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::ManifestError { .. } => "MANIFEST_ERROR",
            Self::IoError { .. } => "IO_ERROR",
        }
    }

    /// HTTP status code this error maps to at the API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AppNotFound { .. } => 404,
            Self::AppAlreadyExists { .. } => 400,
            Self::InvalidAppState { .. } => 400,
            Self::ValidationError { .. } => 400,
            Self::ModuleLoad { .. } => 400,
            Self::ModuleFailed { .. } => 500,
            Self::ManifestError { .. } => 500,
            Self::IoError { .. } => 500,
        }
    }

    /// Build an IoError with operation context.
    pub fn io(operation: impl Into<String>, err: std::io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            details: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppNotFound { name } => {
                write!(f, "App '{}' not found", name)
            }
            Self::AppAlreadyExists { name } => {
                write!(f, "App '{}' already exists", name)
            }
            Self::InvalidAppState {
                name,
                operation,
                state,
            } => {
                write!(f, "App '{}' cannot {} while {}", name, operation, state)
            }
            Self::ModuleLoad { name, reason } => {
                write!(f, "Failed to load module for app '{}': {}", name, reason)
            }
            Self::ModuleFailed { name, hook, reason } => {
                write!(f, "App '{}' {}() failed: {}", name, hook, reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::ManifestError { path, details } => {
                write!(f, "Manifest error at '{}': {}", path, details)
            }
            Self::IoError { operation, details } => {
                write!(f, "IO error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_status() {
        let cases: Vec<(CoreError, &str, u16)> = vec![
            (
                CoreError::AppNotFound {
                    name: "x".to_string(),
                },
                "APP_NOT_FOUND",
                404,
            ),
            (
                CoreError::AppAlreadyExists {
                    name: "x".to_string(),
                },
                "APP_ALREADY_EXISTS",
                400,
            ),
            (
                CoreError::InvalidAppState {
                    name: "x".to_string(),
                    operation: "init",
                    state: AppState::Running,
                },
                "INVALID_APP_STATE",
                400,
            ),
            (
                CoreError::ModuleFailed {
                    name: "x".to_string(),
                    hook: "run",
                    reason: "boom".to_string(),
                },
                "MODULE_FAILED",
                500,
            ),
        ];

        for (error, code, status) in cases {
            assert_eq!(error.error_code(), code);
            assert_eq!(error.http_status(), status);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_invalid_state_display() {
        let err = CoreError::InvalidAppState {
            name: "worker".to_string(),
            operation: "init",
            state: AppState::Running,
        };
        assert_eq!(err.to_string(), "App 'worker' cannot init while RUNNING");
    }
}
