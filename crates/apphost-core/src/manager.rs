// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App registry and health check.
//!
//! [`AppManager`] maps app names to [`App`]s in registration order and
//! offers batch operations whose individual failures are logged, not fatal.
//! The health check is a background loop: every interval, when auto-restart
//! is on, each STOPPED app below the restart cap is re-run; an app at the
//! cap is logged once and skipped until an external `init` resets its
//! counter.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use apphost_sdk::{AppInfo, AppState, AppStatus};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::error::{CoreError, Result};
use crate::loader::SharedLoader;

/// Configuration for the app manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory holding module source files.
    pub base_dir: PathBuf,
    /// How often the health check runs.
    pub health_check_interval: Duration,
    /// Whether stopped apps get re-run automatically.
    pub auto_restart: bool,
    /// Auto-restart attempts per app before giving up.
    pub max_restart_attempts: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./apps"),
            health_check_interval: Duration::from_secs(30),
            auto_restart: true,
            max_restart_attempts: 3,
        }
    }
}

/// Registry of managed apps.
pub struct AppManager {
    apps: RwLock<Vec<App>>,
    loader: SharedLoader,
    config: ManagerConfig,
    shutdown: Arc<Notify>,
}

impl AppManager {
    pub fn new(loader: SharedLoader, config: ManagerConfig) -> Self {
        Self {
            apps: RwLock::new(Vec::new()),
            loader,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn loader(&self) -> &SharedLoader {
        &self.loader
    }

    fn apps_snapshot(&self) -> Vec<App> {
        self.apps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Create an app entry. Fails when the name is taken.
    pub fn register(&self, name: &str) -> Result<App> {
        if name.is_empty() {
            return Err(CoreError::ValidationError {
                field: "name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        let mut apps = self
            .apps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if apps.iter().any(|a| a.name() == name) {
            return Err(CoreError::AppAlreadyExists {
                name: name.to_string(),
            });
        }
        let app = App::new(name);
        apps.push(app.clone());
        debug!(app = name, "app registered");
        Ok(app)
    }

    pub fn get(&self, name: &str) -> Option<App> {
        self.apps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    /// Uninstall and remove an app.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let app = self.get(name).ok_or_else(|| CoreError::AppNotFound {
            name: name.to_string(),
        })?;
        app.uninstall().await?;
        let mut apps = self
            .apps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apps.retain(|a| a.name() != name);
        info!(app = name, "app unregistered");
        Ok(())
    }

    /// Registered names, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.apps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Create-if-absent, then initialize from `info`.
    pub async fn init(&self, name: &str, info: AppInfo) -> Result<()> {
        if info.name != name {
            return Err(CoreError::ValidationError {
                field: "name".to_string(),
                message: format!("info.name '{}' does not match '{}'", info.name, name),
            });
        }
        let app = match self.get(name) {
            Some(app) => app,
            None => self.register(name)?,
        };
        app.init(info, self.loader.as_ref(), &self.config.base_dir)
            .await
    }

    /// Re-initialize an app from its current metadata (the RELOAD verb).
    pub async fn reload(&self, name: &str) -> Result<()> {
        let app = self.get(name).ok_or_else(|| CoreError::AppNotFound {
            name: name.to_string(),
        })?;
        if app.state() == AppState::Running {
            app.stop().await?;
        }
        let info = app.info();
        app.init(info, self.loader.as_ref(), &self.config.base_dir)
            .await
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.get(name)
            .ok_or_else(|| CoreError::AppNotFound {
                name: name.to_string(),
            })?
            .run()
            .await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.get(name)
            .ok_or_else(|| CoreError::AppNotFound {
                name: name.to_string(),
            })?
            .stop()
            .await
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        self.get(name)
            .ok_or_else(|| CoreError::AppNotFound {
                name: name.to_string(),
            })?
            .restart()
            .await
    }

    /// Start every app; failures are logged and skipped.
    pub async fn start_all(&self) {
        for app in self.apps_snapshot() {
            if let Err(e) = app.run().await {
                error!(app = app.name(), error = %e, "failed to start app");
            }
        }
    }

    /// Stop every app; failures are logged and skipped.
    pub async fn stop_all(&self) {
        for app in self.apps_snapshot() {
            if let Err(e) = app.stop().await {
                error!(app = app.name(), error = %e, "failed to stop app");
            }
        }
    }

    pub fn status(&self, name: &str) -> Option<AppStatus> {
        self.get(name).map(|a| a.status())
    }

    pub fn status_all(&self) -> Vec<AppStatus> {
        self.apps_snapshot().iter().map(App::status).collect()
    }

    /// Current metadata of every app, in registration order.
    pub fn export(&self) -> Vec<AppInfo> {
        self.apps_snapshot().iter().map(App::info).collect()
    }

    /// Idempotent bulk init from a manifest; failures are logged and
    /// skipped.
    pub async fn load(&self, infos: Vec<AppInfo>) {
        for info in infos {
            let name = info.name.clone();
            if let Err(e) = self.init(&name, info).await {
                error!(app = %name, error = %e, "failed to load app from manifest");
            }
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the health-check loop until the shutdown signal.
    pub async fn run_health_check(&self) {
        info!(
            interval_secs = self.config.health_check_interval.as_secs(),
            auto_restart = self.config.auto_restart,
            max_restart_attempts = self.config.max_restart_attempts,
            "health check started"
        );

        let mut gave_up: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("health check received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.health_check_interval) => {
                    self.health_tick(&mut gave_up).await;
                }
            }
        }

        info!("health check stopped");
    }

    async fn health_tick(&self, gave_up: &mut HashSet<String>) {
        if !self.config.auto_restart {
            return;
        }
        for app in self.apps_snapshot() {
            if app.state() != AppState::Stopped {
                // A re-init or manual start clears the way for future
                // auto-restarts.
                gave_up.remove(app.name());
                continue;
            }
            let restart_count = app.stats().restart_count;
            if restart_count < self.config.max_restart_attempts {
                info!(
                    app = app.name(),
                    attempt = restart_count + 1,
                    "auto-restarting stopped app"
                );
                if let Err(e) = app.restart().await {
                    warn!(app = app.name(), error = %e, "auto-restart failed");
                }
            } else if gave_up.insert(app.name().to_string()) {
                warn!(
                    app = app.name(),
                    attempts = restart_count,
                    "restart attempts exhausted; giving up until re-init"
                );
            }
        }
    }
}

impl std::fmt::Debug for AppManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppManager")
            .field("apps", &self.list())
            .field("config", &self.config)
            .finish()
    }
}
