// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cooperative cancellation for user module code.
//!
//! A [`TaskGate`] is the handle a module routes its awaits through:
//! `gate.wrap(fut)` races the app's current cancellation token against the
//! future and fails with [`SdkError::Cancelled`] ("App stopped") once the
//! token fires. The gate is cloneable; the app fires it on stop and installs
//! a fresh token on every run so a restart never sees a pre-fired token.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SdkError};

/// Cloneable handle over the app's current cancellation token.
#[derive(Debug, Clone, Default)]
pub struct TaskGate {
    token: Arc<Mutex<CancellationToken>>,
}

impl TaskGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Race `fut` against cancellation.
    ///
    /// Resolves to the future's output, or fails with
    /// [`SdkError::Cancelled`] when the token fires first. The losing future
    /// is dropped; long-lived resources inside user code stay user-owned.
    pub async fn wrap<F: Future>(&self, fut: F) -> Result<F::Output> {
        let token = self.current();
        tokio::select! {
            biased;

            _ = token.cancelled() => Err(SdkError::Cancelled),
            value = fut => Ok(value),
        }
    }

    /// Fire the current token. One-shot and idempotent: every pending and
    /// future [`Self::wrap`] call against this token fails.
    pub fn fire(&self) {
        self.current().cancel();
    }

    /// Install a fresh, unset token. Called on every transition into
    /// RUNNING so restarts start clean.
    pub fn reset(&self) {
        let mut guard = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = CancellationToken::new();
    }

    /// Whether the current token has fired.
    pub fn is_fired(&self) -> bool {
        self.current().is_cancelled()
    }

    /// Wait until the current token fires.
    pub async fn cancelled(&self) {
        self.current().cancelled().await;
    }
}
