//! Storage layer for emissary
//!
//! This module provides the durable layer using SQLite with:
//! - Schema migrations
//! - The FIFO command queue
//! - Key/value settings for session and identity bookkeeping

pub mod queue;
pub mod schema;
pub mod settings;
pub mod store;

pub use queue::CommandQueue;
pub use settings::Settings;
pub use store::Store;
