//! Network delivery for queued commands
//!
//! The transport is synchronous in contract: one request per call, success
//! or failure reported to the caller, no internal retry. The [`Delivery`]
//! trait is the seam tests script against; [`HttpDeliveryClient`] is the
//! real reqwest-backed implementation.

pub mod client;
pub mod protocol;

pub use client::{Delivery, HttpDeliveryClient};
pub use protocol::{BulkRequest, BulkResponse};
