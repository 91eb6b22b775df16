// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures: in-process test modules and a manager factory.

#![allow(dead_code)] // Not every test binary uses every fixture

use std::sync::Arc;
use std::time::Duration;

use apphost_core::loader::StaticLoader;
use apphost_core::manager::{AppManager, ManagerConfig};
use apphost_sdk::{module_ctor, AppInfo, AppModule, ModuleHost, Result, SdkError};
use async_trait::async_trait;

/// Loops forever on wrapped sleeps; the canonical long-running app.
pub struct LoopModule {
    host: ModuleHost,
}

#[async_trait]
impl AppModule for LoopModule {
    async fn run(&self) -> Result<()> {
        loop {
            self.host
                .gate
                .wrap(tokio::time::sleep(Duration::from_secs(3600)))
                .await?;
        }
    }
}

/// Fails immediately from run().
pub struct FailModule;

#[async_trait]
impl AppModule for FailModule {
    async fn run(&self) -> Result<()> {
        Err(SdkError::module("boom"))
    }
}

/// Returns from run() immediately with success.
pub struct QuickModule;

#[async_trait]
impl AppModule for QuickModule {
    async fn run(&self) -> Result<()> {
        Ok(())
    }
}

/// Logs a line per tick until cancelled.
pub struct TickerModule {
    host: ModuleHost,
}

#[async_trait]
impl AppModule for TickerModule {
    async fn run(&self) -> Result<()> {
        let mut n = 0u64;
        loop {
            self.host
                .gate
                .wrap(tokio::time::sleep(Duration::from_millis(50)))
                .await?;
            n += 1;
            self.host
                .console
                .info("tick %d", &[serde_json::json!(n)]);
        }
    }
}

/// A loader with every test module registered under its conventional name.
pub fn test_loader() -> Arc<StaticLoader> {
    let loader = Arc::new(StaticLoader::new());
    loader.register("looper", module_ctor(|host: ModuleHost| LoopModule { host }));
    loader.register("failer", module_ctor(|_host: ModuleHost| FailModule));
    loader.register("quick", module_ctor(|_host: ModuleHost| QuickModule));
    loader.register("ticker", module_ctor(|host: ModuleHost| TickerModule { host }));
    loader
}

/// Manager over a temp base dir with a fast health-check interval.
pub fn test_manager(tempdir: &tempfile::TempDir) -> Arc<AppManager> {
    test_manager_with(tempdir, Duration::from_millis(50), 3)
}

pub fn test_manager_with(
    tempdir: &tempfile::TempDir,
    health_interval: Duration,
    max_restart_attempts: u32,
) -> Arc<AppManager> {
    Arc::new(AppManager::new(
        test_loader(),
        ManagerConfig {
            base_dir: tempdir.path().to_path_buf(),
            health_check_interval: health_interval,
            auto_restart: true,
            max_restart_attempts,
        },
    ))
}

/// Minimal valid metadata for one of the registered test modules.
pub fn info_for(name: &str) -> AppInfo {
    let mut info = AppInfo::new(name, "1.0.0");
    info.description = format!("test app {name}");
    info.timestamp = 1;
    info
}
