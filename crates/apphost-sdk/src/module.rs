// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The contract user modules implement.
//!
//! A module constructor receives a [`ModuleHost`] (the app's metadata, its
//! console and its cancellation gate) and returns the module object whose
//! `init`/`run`/`stop` hooks the lifecycle engine drives. `run()` is
//! expected to loop until cancelled, routing every await through
//! [`TaskGate::wrap`](crate::TaskGate::wrap) so `stop()` can pre-empt it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::console::Console;
use crate::error::Result;
use crate::gate::TaskGate;
use crate::types::AppInfo;

/// Everything a module gets from its host app.
#[derive(Debug, Clone)]
pub struct ModuleHost {
    /// The app's own metadata, including environment fields.
    pub info: AppInfo,
    /// The app's bounded log console.
    pub console: Console,
    /// Cancellation gate for cooperative stop.
    pub gate: TaskGate,
}

/// Lifecycle hooks of one user module.
#[async_trait]
pub trait AppModule: Send + Sync {
    /// One-time setup after construction.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// The module's main loop. Expected to run until the gate cancels it.
    async fn run(&self) -> Result<()>;

    /// Cleanup on stop, after the gate has fired.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructor producing a module instance from its host bundle.
pub type ModuleCtor = Arc<dyn Fn(ModuleHost) -> Arc<dyn AppModule> + Send + Sync>;

/// Wrap a plain constructor function into a [`ModuleCtor`].
pub fn module_ctor<F, M>(f: F) -> ModuleCtor
where
    F: Fn(ModuleHost) -> M + Send + Sync + 'static,
    M: AppModule + 'static,
{
    Arc::new(move |host| {
        let module: Arc<dyn AppModule> = Arc::new(f(host));
        module
    })
}
