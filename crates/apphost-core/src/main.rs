// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Apphost - single-host app runtime
//!
//! Loads the app manifest, starts the health check and the HTTP control
//! surface, and shuts down gracefully on ctrl-c (saving the manifest).
//! Exits nonzero when the listener cannot bind.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use apphost_core::api::{build_router, ApiState};
use apphost_core::config::Config;
use apphost_core::manager::{AppManager, ManagerConfig};
use apphost_core::manifest;
use apphost_core::loader::StaticLoader;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("apphost=info".parse().unwrap()),
        )
        .init();

    info!("Starting Apphost");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        addr = %config.listen_addr,
        base_dir = %config.base_dir.display(),
        manifest = %config.manifest_path.display(),
        auto_restart = config.auto_restart,
        "Configuration loaded"
    );

    // The embedded loader; modules are registered into it by the host
    // binary that links this crate. See loader::StaticLoader.
    let loader = Arc::new(StaticLoader::new());

    let manager = Arc::new(AppManager::new(
        loader,
        ManagerConfig {
            base_dir: config.base_dir.clone(),
            health_check_interval: config.health_check_interval,
            auto_restart: config.auto_restart,
            max_restart_attempts: config.max_restart_attempts,
        },
    ));

    // Load the persisted app list
    let infos = manifest::load_manifest(&config.manifest_path).await?;
    info!(apps = infos.len(), "Manifest loaded");
    manager.load(infos).await;
    manager.start_all().await;

    // Health check task
    let health_manager = manager.clone();
    let health_shutdown = manager.shutdown_handle();
    let health_handle = tokio::spawn(async move {
        health_manager.run_health_check().await;
    });

    // HTTP control surface
    let state = Arc::new(ApiState {
        manager: manager.clone(),
        manifest_path: config.manifest_path.clone(),
    });
    let router = Arc::new(build_router(state, config.web_root.clone()));

    let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
        error!(addr = %config.listen_addr, error = %e, "Failed to bind listener");
        e
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(apphost_http::server::serve(
        listener,
        router,
        shutdown_rx,
    ));

    info!("Apphost initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(true);
    health_shutdown.notify_waiters();
    manager.stop_all().await;

    // Persist the app list for the next start
    if let Err(e) = manifest::save_manifest(&config.manifest_path, &manager.export()).await {
        error!(error = %e, "Failed to save manifest on shutdown");
    }

    let _ = server_handle.await;
    health_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
