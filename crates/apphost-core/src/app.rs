// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-app lifecycle state machine.
//!
//! ```text
//! UNINITIALIZED --init--> INITIALIZED --run--> RUNNING --stop--> STOPPED
//!      ^                                          |                |
//!      |                                          +---(error)----->+
//!      +------------------ uninstall --------------(any)
//! ```
//!
//! `run()` spawns the user module's `run()` as a task and races it against a
//! one-second warmup timer: modules are expected to loop until cancelled, so
//! the call returns to the caller once the task survives warmup. A monitor
//! task watches the background run; a non-cancellation failure records
//! `last_error` and moves the app to STOPPED. `stop()` fires the app's
//! cancellation gate, which rejects every wrapped await inside user code
//! with "App stopped", then runs the module's `stop()` hook.
//!
//! All transitions on one app are serialized by an internal mutex; the
//! cancellation gate gets a fresh token on every entry into RUNNING.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use apphost_sdk::{
    AppInfo, AppModule, AppState, AppStats, AppStatus, Console, ModuleHost, TaskGate,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::loader::ModuleLoader;

/// How long `run()` waits for the user task before declaring it started.
pub const RUN_WARMUP: Duration = Duration::from_secs(1);

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct AppInner {
    name: String,
    console: Console,
    gate: TaskGate,
    info: Mutex<AppInfo>,
    state: Mutex<AppState>,
    stats: Mutex<AppStats>,
    module: Mutex<Option<Arc<dyn AppModule>>>,
    /// Serializes init/run/stop/restart/uninstall.
    transition: AsyncMutex<()>,
}

/// One managed app. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(AppInner {
                info: Mutex::new(AppInfo::new(name.clone(), "")),
                name,
                console: Console::new(),
                gate: TaskGate::new(),
                state: Mutex::new(AppState::Uninitialized),
                stats: Mutex::new(AppStats::default()),
                module: Mutex::new(None),
                transition: AsyncMutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn console(&self) -> &Console {
        &self.inner.console
    }

    /// The app's cancellation gate (shared with its module).
    pub fn gate(&self) -> &TaskGate {
        &self.inner.gate
    }

    pub fn state(&self) -> AppState {
        *lock(&self.inner.state)
    }

    pub fn info(&self) -> AppInfo {
        lock(&self.inner.info).clone()
    }

    pub fn stats(&self) -> AppStats {
        lock(&self.inner.stats).clone()
    }

    pub fn status(&self) -> AppStatus {
        AppStatus {
            name: self.inner.name.clone(),
            state: self.state(),
            info: self.info(),
            stats: self.stats(),
        }
    }

    fn set_state(&self, state: AppState) {
        *lock(&self.inner.state) = state;
    }

    fn record_error(&self, error: &str) {
        lock(&self.inner.stats).last_error = Some(error.to_string());
    }

    /// Load and initialize the module described by `info`.
    ///
    /// Forbidden while RUNNING. Any previous module is uninstalled first.
    /// On success the app is INITIALIZED with a fresh cancellation token and
    /// a reset restart counter; on failure `last_error` is recorded and the
    /// app stays UNINITIALIZED.
    pub async fn init(
        &self,
        info: AppInfo,
        loader: &dyn ModuleLoader,
        base_dir: &std::path::Path,
    ) -> Result<()> {
        let _transition = self.inner.transition.lock().await;

        if self.state() == AppState::Running {
            return Err(CoreError::InvalidAppState {
                name: self.inner.name.clone(),
                operation: "init",
                state: AppState::Running,
            });
        }
        self.uninstall_locked().await?;

        let path = base_dir.join(info.module_file_name(loader.extension()));
        debug!(app = %self.inner.name, path = %path.display(), "loading module");
        let ctor = match loader.load(&path).await {
            Ok(ctor) => ctor,
            Err(e) => {
                self.record_error(&e.to_string());
                return Err(e);
            }
        };

        self.inner.gate.reset();
        let module = ctor(ModuleHost {
            info: info.clone(),
            console: self.inner.console.clone(),
            gate: self.inner.gate.clone(),
        });

        if let Err(e) = module.init().await {
            let err = CoreError::ModuleFailed {
                name: self.inner.name.clone(),
                hook: "init",
                reason: e.to_string(),
            };
            self.record_error(&err.to_string());
            return Err(err);
        }

        *lock(&self.inner.module) = Some(module);
        *lock(&self.inner.info) = info;
        {
            let mut stats = lock(&self.inner.stats);
            stats.restart_count = 0;
            stats.last_error = None;
        }
        self.set_state(AppState::Initialized);
        info!(app = %self.inner.name, "app initialized");
        Ok(())
    }

    /// Start the module's `run()` loop. Allowed from INITIALIZED or STOPPED.
    pub async fn run(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.run_locked().await
    }

    async fn run_locked(&self) -> Result<()> {
        let state = self.state();
        if !matches!(state, AppState::Initialized | AppState::Stopped) {
            return Err(CoreError::InvalidAppState {
                name: self.inner.name.clone(),
                operation: "run",
                state,
            });
        }
        let module = lock(&self.inner.module)
            .clone()
            .ok_or_else(|| CoreError::InvalidAppState {
                name: self.inner.name.clone(),
                operation: "run",
                state,
            })?;

        // Fresh token on every RUNNING entry so a restart never observes a
        // pre-fired cancellation.
        self.inner.gate.reset();
        lock(&self.inner.stats).start_time = Some(now_ms());
        self.set_state(AppState::Running);
        info!(app = %self.inner.name, "app running");

        let mut task = tokio::spawn(async move { module.run().await });

        match tokio::time::timeout(RUN_WARMUP, &mut task).await {
            // run() returned inside the warmup window.
            Ok(joined) => match flatten(joined) {
                Ok(()) => {
                    // Completed immediately; record the (very short) run.
                    self.finish_run(None);
                    Ok(())
                }
                Err(reason) => {
                    let err = CoreError::ModuleFailed {
                        name: self.inner.name.clone(),
                        hook: "run",
                        reason,
                    };
                    self.finish_run(Some(err.to_string()));
                    Err(err)
                }
            },
            // Timer won: the module is looping. Watch it from the side.
            Err(_elapsed) => {
                let app = self.clone();
                tokio::spawn(async move {
                    match task.await {
                        // A late clean return leaves the state as-is; the
                        // task simply ran to completion.
                        Ok(Ok(())) => {
                            debug!(app = %app.inner.name, "app run returned");
                        }
                        Ok(Err(e)) if e.is_cancelled() => {}
                        Ok(Err(e)) => app.fail_running(e.to_string()).await,
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => {
                            app.fail_running(format!("run task panicked: {join_err}")).await
                        }
                    }
                });
                Ok(())
            }
        }
    }

    /// Background-run failure path: records the error and stops the app,
    /// unless a concurrent stop() already moved it out of RUNNING.
    async fn fail_running(&self, reason: String) {
        let _transition = self.inner.transition.lock().await;
        if self.state() != AppState::Running {
            return;
        }
        warn!(app = %self.inner.name, error = %reason, "app run failed");
        let err = CoreError::ModuleFailed {
            name: self.inner.name.clone(),
            hook: "run",
            reason,
        };
        self.finish_run(Some(err.to_string()));
    }

    /// Stop a running app: STOPPING, fire the gate, run the module's
    /// `stop()` hook, then STOPPED. No-op outside RUNNING.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<()> {
        if self.state() != AppState::Running {
            return Ok(());
        }
        self.set_state(AppState::Stopping);
        // Every pending wrap() in user code now rejects with "App stopped".
        self.inner.gate.fire();

        let module = lock(&self.inner.module).clone();
        if let Some(module) = module {
            if let Err(e) = module.stop().await {
                let err = CoreError::ModuleFailed {
                    name: self.inner.name.clone(),
                    hook: "stop",
                    reason: e.to_string(),
                };
                warn!(app = %self.inner.name, error = %err, "app stop hook failed");
                self.record_error(&err.to_string());
            }
        }

        self.finish_run(None);
        info!(app = %self.inner.name, "app stopped");
        Ok(())
    }

    /// Stop, bump the restart counter, run again.
    pub async fn restart(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.stop_locked().await?;
        lock(&self.inner.stats).restart_count += 1;
        self.run_locked().await
    }

    /// Stop if needed, drop the module, return to UNINITIALIZED.
    pub async fn uninstall(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.uninstall_locked().await
    }

    async fn uninstall_locked(&self) -> Result<()> {
        self.stop_locked().await?;
        *lock(&self.inner.module) = None;
        self.set_state(AppState::Uninitialized);
        Ok(())
    }

    /// Record stop time and accumulated uptime, set STOPPED, and keep the
    /// error (if any) in `last_error`. Double application is prevented by
    /// callers checking the state first.
    fn finish_run(&self, error: Option<String>) {
        let now = now_ms();
        let mut stats = lock(&self.inner.stats);
        stats.stop_time = Some(now);
        if let Some(start) = stats.start_time {
            stats.uptime_ms += (now - start).max(0) as u64;
        }
        if let Some(error) = error {
            stats.last_error = Some(error);
        }
        drop(stats);
        self.set_state(AppState::Stopped);
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn flatten(joined: std::result::Result<apphost_sdk::Result<()>, tokio::task::JoinError>) -> std::result::Result<(), String> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.is_cancelled() => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) => Err(format!("run task panicked: {join_err}")),
    }
}
