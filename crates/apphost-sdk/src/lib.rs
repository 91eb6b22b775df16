// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Apphost SDK - the module-facing side of the app runtime.
//!
//! User task modules are built against this crate alone. A module implements
//! [`AppModule`] and is constructed from a [`ModuleHost`] carrying its
//! [`AppInfo`] environment, a bounded [`Console`] for logging, and a
//! [`TaskGate`] for cooperative cancellation.
//!
//! # Writing a module
//!
//! ```ignore
//! use apphost_sdk::{module_ctor, AppModule, ModuleCtor, ModuleHost, Result};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct Ticker {
//!     host: ModuleHost,
//! }
//!
//! #[async_trait]
//! impl AppModule for Ticker {
//!     async fn run(&self) -> Result<()> {
//!         loop {
//!             // Every await goes through the gate so stop() can pre-empt
//!             // the loop; a fired gate fails with "App stopped".
//!             self.host
//!                 .gate
//!                 .wrap(tokio::time::sleep(Duration::from_secs(1)))
//!                 .await?;
//!             self.host.console.info("tick", &[]);
//!         }
//!     }
//! }
//!
//! pub fn ctor() -> ModuleCtor {
//!     module_ctor(|host| Ticker { host })
//! }
//! ```

pub mod console;
pub mod error;
pub mod events;
pub mod gate;
pub mod module;
pub mod types;

pub use console::{Console, ConsoleEvent, DEFAULT_MAX_MESSAGES};
pub use error::{Result, SdkError};
pub use events::{EventBus, DEFAULT_LEAK_THRESHOLD};
pub use gate::TaskGate;
pub use module::{module_ctor, AppModule, ModuleCtor, ModuleHost};
pub use types::{AppInfo, AppState, AppStats, AppStatus, LogLevel, LogMessage};
