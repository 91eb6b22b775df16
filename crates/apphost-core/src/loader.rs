// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The module-loading capability.
//!
//! The sandbox that turns source code into executable modules lives outside
//! this crate; the core only depends on [`ModuleLoader`]: resolve a module
//! file path to a constructor, and pre-check uploaded source. How a loader
//! compiles or isolates modules is its own business.
//!
//! [`StaticLoader`] is the embedded implementation: a registry of named
//! constructors linked into the host binary. It is what the tests and the
//! default binary use.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use apphost_sdk::ModuleCtor;
use async_trait::async_trait;

use crate::error::{CoreError, Result};

/// Capability to load app modules and pre-check their source.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// File extension of module sources (`<name>.<timestamp>.<ext>`).
    fn extension(&self) -> &str {
        "app"
    }

    /// Pre-compile check for uploaded source; the PUT route gate.
    async fn check(&self, name: &str, source: &str) -> Result<()>;

    /// Resolve a module file path to a constructor.
    async fn load(&self, path: &Path) -> Result<ModuleCtor>;
}

/// Embedded registry of named module constructors.
#[derive(Default)]
pub struct StaticLoader {
    ctors: RwLock<HashMap<String, ModuleCtor>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under an app name.
    pub fn register(&self, name: impl Into<String>, ctor: ModuleCtor) {
        let mut ctors = self
            .ctors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ctors.insert(name.into(), ctor);
    }

    pub fn registered(&self) -> Vec<String> {
        let ctors = self
            .ctors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ctors.keys().cloned().collect()
    }

    fn lookup(&self, name: &str) -> Option<ModuleCtor> {
        let ctors = self
            .ctors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ctors.get(name).cloned()
    }
}

#[async_trait]
impl ModuleLoader for StaticLoader {
    async fn check(&self, name: &str, _source: &str) -> Result<()> {
        if self.lookup(name).is_some() {
            Ok(())
        } else {
            Err(CoreError::ModuleLoad {
                name: name.to_string(),
                reason: "no module registered under this name".to_string(),
            })
        }
    }

    async fn load(&self, path: &Path) -> Result<ModuleCtor> {
        let name = app_name_from_path(path).ok_or_else(|| CoreError::ModuleLoad {
            name: path.display().to_string(),
            reason: "module file name is not <name>.<timestamp>.<ext>".to_string(),
        })?;
        self.lookup(&name).ok_or_else(|| CoreError::ModuleLoad {
            name,
            reason: "no module registered under this name".to_string(),
        })
    }
}

/// Extract the app name from `<name>.<timestamp>.<ext>`. Names may contain
/// dots; timestamp and extension are the last two components.
fn app_name_from_path(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    let mut parts = file.rsplitn(3, '.');
    let _ext = parts.next()?;
    let _timestamp = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Shared loader handle.
pub type SharedLoader = Arc<dyn ModuleLoader>;
