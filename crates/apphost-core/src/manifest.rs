// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App list persistence: a JSON array of [`AppInfo`] records on disk.
//!
//! This is the whole on-disk edge of the core; the manager consumes
//! `load_manifest` at startup and its `export()` feeds `save_manifest` on
//! shutdown and after mutations.

use std::path::Path;

use apphost_sdk::AppInfo;

use crate::error::{CoreError, Result};

/// Read the manifest. A missing file is an empty list.
pub async fn load_manifest(path: &Path) -> Result<Vec<AppInfo>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CoreError::ManifestError {
                path: path.display().to_string(),
                details: e.to_string(),
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|e| CoreError::ManifestError {
        path: path.display().to_string(),
        details: format!("invalid JSON: {e}"),
    })
}

/// Write the manifest, creating parent directories as needed.
pub async fn save_manifest(path: &Path, infos: &[AppInfo]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::io("create manifest dir", e))?;
    }
    let json = serde_json::to_vec_pretty(infos).map_err(|e| CoreError::ManifestError {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| CoreError::ManifestError {
            path: path.display().to_string(),
            details: e.to_string(),
        })
}
