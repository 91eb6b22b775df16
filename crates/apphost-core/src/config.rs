// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Apphost configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener address
    pub listen_addr: SocketAddr,
    /// Directory holding app module source files
    pub base_dir: PathBuf,
    /// Path of the JSON app manifest
    pub manifest_path: PathBuf,
    /// Optional static web root served at `/`
    pub web_root: Option<PathBuf>,
    /// Interval between health-check passes
    pub health_check_interval: Duration,
    /// Whether stopped apps are re-run by the health check
    pub auto_restart: bool,
    /// Auto-restart attempts per app before giving up
    pub max_restart_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            base_dir: PathBuf::from("./apps"),
            manifest_path: PathBuf::from("./apps/apps.json"),
            web_root: None,
            health_check_interval: Duration::from_secs(30),
            auto_restart: true,
            max_restart_attempts: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `APPHOST_ADDR`: listener address (default: `0.0.0.0:8080`)
    /// - `APPHOST_BASE_DIR`: module source directory (default: `./apps`)
    /// - `APPHOST_MANIFEST`: manifest path (default: `<base>/apps.json`)
    /// - `APPHOST_WEB_ROOT`: static web root, unset disables static serving
    /// - `APPHOST_HEALTH_INTERVAL_SECS`: health-check period (default: 30)
    /// - `APPHOST_AUTO_RESTART`: `true`/`false` (default: true)
    /// - `APPHOST_MAX_RESTART_ATTEMPTS`: restart cap (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let listen_addr = match std::env::var("APPHOST_ADDR") {
            Ok(addr) => addr
                .parse()
                .map_err(|_| ConfigError::Invalid("APPHOST_ADDR", "must be host:port"))?,
            Err(_) => default.listen_addr,
        };

        let base_dir = std::env::var("APPHOST_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or(default.base_dir);

        let manifest_path = std::env::var("APPHOST_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("apps.json"));

        let web_root = std::env::var("APPHOST_WEB_ROOT").ok().map(PathBuf::from);

        let health_check_interval = match std::env::var("APPHOST_HEALTH_INTERVAL_SECS") {
            Ok(secs) => Duration::from_secs(secs.parse().map_err(|_| {
                ConfigError::Invalid("APPHOST_HEALTH_INTERVAL_SECS", "must be seconds")
            })?),
            Err(_) => default.health_check_interval,
        };

        let auto_restart = match std::env::var("APPHOST_AUTO_RESTART") {
            Ok(flag) => flag
                .parse()
                .map_err(|_| ConfigError::Invalid("APPHOST_AUTO_RESTART", "must be true/false"))?,
            Err(_) => default.auto_restart,
        };

        let max_restart_attempts = match std::env::var("APPHOST_MAX_RESTART_ATTEMPTS") {
            Ok(n) => n.parse().map_err(|_| {
                ConfigError::Invalid("APPHOST_MAX_RESTART_ATTEMPTS", "must be an integer")
            })?,
            Err(_) => default.max_restart_attempts,
        };

        Ok(Self {
            listen_addr,
            base_dir,
            manifest_path,
            web_root,
            health_check_interval,
            auto_restart,
            max_restart_attempts,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
