//! Bulk wire protocol
//!
//! One flush attempt POSTs a batch to `<target>/bulk`:
//!
//! ```json
//! {"commands": [{"name": "crm/events", "data": {...}}, ...]}
//! ```
//!
//! The endpoint answers with an overall verdict plus per-command statuses,
//! positionally aligned with the sent batch:
//!
//! ```json
//! {"success": true, "results": [{"status": "ok"}, {"status": "retry"}]}
//! ```

use crate::error::{Error, Result};
use crate::types::QueueEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body for POST /bulk
#[derive(Debug, Serialize)]
pub struct BulkRequest {
    pub commands: Vec<WireCommand>,
}

impl BulkRequest {
    /// Assemble the wire body for a popped batch
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        BulkRequest {
            commands: entries.iter().map(WireCommand::from_entry).collect(),
        }
    }
}

/// One command as it appears on the wire
#[derive(Debug, Serialize)]
pub struct WireCommand {
    pub name: String,
    pub data: Map<String, Value>,
}

impl WireCommand {
    fn from_entry(entry: &QueueEntry) -> Self {
        WireCommand {
            name: entry.endpoint.clone(),
            data: entry.payload.clone(),
        }
    }
}

/// Response body for POST /bulk
#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    /// Overall verdict; anything but `true` fails the whole batch
    #[serde(default)]
    pub success: bool,

    /// Per-command statuses. May be missing or shorter than the batch, in
    /// which case unlisted commands count as delivered.
    #[serde(default)]
    pub results: Vec<CommandResult>,
}

impl BulkResponse {
    /// Parse the endpoint's JSON reply
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Delivery(format!("malformed bulk response: {}", e)))
    }
}

/// Per-command acknowledgment
#[derive(Debug, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub status: String,
}

impl CommandResult {
    /// True when the endpoint asked for this command to be resent
    pub fn is_retry(&self) -> bool {
        self.status.eq_ignore_ascii_case("retry")
    }
}
