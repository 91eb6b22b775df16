// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared types for apps: metadata, lifecycle states, stats, log records.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    /// No module loaded.
    Uninitialized,
    /// Module loaded and initialized, not running.
    Initialized,
    /// User `run()` in flight.
    Running,
    /// Stop requested; cancellation token fired.
    Stopping,
    /// Run ended (stopped, completed, or failed).
    Stopped,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Uninitialized => "UNINITIALIZED",
            AppState::Initialized => "INITIALIZED",
            AppState::Running => "RUNNING",
            AppState::Stopping => "STOPPING",
            AppState::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one app.
///
/// `name` is the unique key and immutable after registration; `timestamp`
/// is a monotonic creation id used to name the module source file
/// `<name>.<timestamp>.<ext>`. Any extra fields are forwarded to the module
/// as its environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(flatten)]
    pub env: serde_json::Map<String, serde_json::Value>,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            timestamp: 0,
            env: serde_json::Map::new(),
        }
    }

    /// File name of this app's module source: `<name>.<timestamp>.<ext>`.
    pub fn module_file_name(&self, ext: &str) -> String {
        format!("{}.{}.{}", self.name, self.timestamp, ext)
    }
}

/// Runtime counters for one app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStats {
    /// Milliseconds since epoch of the last RUNNING entry.
    pub start_time: Option<i64>,
    /// Milliseconds since epoch of the last stop.
    pub stop_time: Option<i64>,
    /// Accumulated run time across completed start/stop intervals.
    pub uptime_ms: u64,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// Status record returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub name: String,
    pub state: AppState,
    pub info: AppInfo,
    #[serde(flatten)]
    pub stats: AppStats,
}

/// Severity of one console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One formatted console record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    /// Plain-text rendering.
    pub message: String,
    /// HTML rendering (escaped, `\n` as `<br>`, objects in `<pre>`).
    pub html: String,
    pub error: bool,
    pub uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&AppState::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::from_str::<AppState>("\"UNINITIALIZED\"").unwrap(),
            AppState::Uninitialized
        );
        assert_eq!(AppState::Stopping.to_string(), "STOPPING");
    }

    #[test]
    fn test_app_info_extra_fields_flatten() {
        let json = r#"{"name":"worker","version":"1.0.0","description":"d","timestamp":42,"region":"eu","retries":3}"#;
        let info: AppInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.name, "worker");
        assert_eq!(info.timestamp, 42);
        assert_eq!(info.env.get("region").unwrap(), "eu");
        assert_eq!(info.env.get("retries").unwrap(), 3);

        let back = serde_json::to_value(&info).unwrap();
        assert_eq!(back["region"], "eu");
    }

    #[test]
    fn test_module_file_name() {
        let mut info = AppInfo::new("ticker", "0.1.0");
        info.timestamp = 1700000000000;
        assert_eq!(info.module_file_name("app"), "ticker.1700000000000.app");
    }

    #[test]
    fn test_status_flattens_stats() {
        let status = AppStatus {
            name: "a".to_string(),
            state: AppState::Stopped,
            info: AppInfo::new("a", "1"),
            stats: AppStats {
                restart_count: 2,
                ..AppStats::default()
            },
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], "STOPPED");
        assert_eq!(v["restartCount"], 2);
    }
}
