//! # emissary-core
//!
//! Core library for emissary - an embedded client that reliably delivers
//! discrete usage/event records to a remote collection endpoint.
//!
//! This library provides:
//! - A durable SQLite-backed command queue
//! - A batched delivery pipeline with acknowledgment-driven removal
//! - Session lifecycle tracking with an inactivity timeout
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Commands flow through the pipeline in two decoupled halves:
//! - **Schedule:** a command is serialized and durably queued before the
//!   call returns; no network is involved.
//! - **Flush:** a manual or timer-triggered drain pops batches oldest-first,
//!   POSTs them, and clears only acknowledged rows. Failed batches stay
//!   queued and are retried on the next flush, which makes delivery
//!   at-least-once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use emissary_core::{Command, CommandManager, Config, HttpDeliveryClient, Store};
//!
//! # fn main() -> emissary_core::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(Store::open(&Config::database_path())?);
//! let delivery = Arc::new(HttpDeliveryClient::new(&config.delivery)?);
//!
//! let manager = CommandManager::new(store, delivery, &config.delivery);
//! manager.schedule(&Command::event(
//!     "level_up",
//!     serde_json::Map::new(),
//!     None,
//!     &config.tracker.project_token,
//!     &serde_json::Map::new(),
//! ))?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{CommandQueue, Settings, Store};
pub use delivery::{Delivery, HttpDeliveryClient};
pub use error::{Error, Result};
pub use manager::CommandManager;
pub use session::SessionTracker;
pub use types::{Command, CommandKind, QueueEntry};

// Public modules
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod manager;
pub mod session;
pub mod types;
