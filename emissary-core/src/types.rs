//! Core domain types for emissary
//!
//! A [`Command`] is a single usage/event record destined for the collection
//! endpoint. Commands are immutable once constructed; the queue and delivery
//! layers only depend on the common `{endpoint, payload, timestamp}` shape.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Command** | A single event/identity record destined for delivery |
//! | **QueueEntry** | The durable, queue-resident representation of a Command |
//! | **Batch** | An ordered group of QueueEntry selected for one delivery attempt |
//! | **Flush** | One drain cycle attempting to deliver all currently queued batches |
//! | **Session** | A bounded span of app activity, bounded by inactivity timeout |

use chrono::Utc;
use serde_json::{Map, Value};

/// Endpoint for event commands
pub const ENDPOINT_TRACK: &str = "crm/events";
/// Endpoint for customer-attribute commands
pub const ENDPOINT_UPDATE: &str = "crm/customers";

/// Event type emitted when a new session begins
pub const EVENT_SESSION_START: &str = "session_start";
/// Event type emitted when an expired session is closed
pub const EVENT_SESSION_END: &str = "session_end";

/// Session duration property, seconds
pub const PROPERTY_DURATION: &str = "duration";
/// Host application version property
pub const PROPERTY_APP_VERSION: &str = "app_version";

/// Seconds since the Unix epoch, sub-second precision
pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Which payload shape a command carries.
///
/// The queue and delivery layers never branch on this; it exists so callers
/// and tests can tell event records from customer-attribute records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Caller-assembled payload for an arbitrary endpoint
    Generic,
    /// A tracked event (`crm/events`)
    Event,
    /// A customer attribute update (`crm/customers`)
    Customer,
}

/// A single record destined for delivery.
///
/// Immutable once constructed. Produced by host-application callers or by
/// the session tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Payload shape tag
    pub kind: CommandKind,
    /// Resource path on the collection endpoint
    pub endpoint: String,
    /// Ordered payload map, serialized verbatim onto the wire
    pub payload: Map<String, Value>,
    /// Epoch seconds at which the record was produced
    pub timestamp: f64,
}

impl Command {
    /// A command with a caller-assembled payload.
    pub fn generic(endpoint: impl Into<String>, payload: Map<String, Value>, timestamp: Option<f64>) -> Self {
        Command {
            kind: CommandKind::Generic,
            endpoint: endpoint.into(),
            payload,
            timestamp: timestamp.unwrap_or_else(current_timestamp),
        }
    }

    /// An event record for `crm/events`.
    ///
    /// The payload carries the customer ids, project token, event type,
    /// properties, and timestamp, in that order.
    pub fn event(
        event_type: &str,
        properties: Map<String, Value>,
        timestamp: Option<f64>,
        project_token: &str,
        customer_ids: &Map<String, Value>,
    ) -> Self {
        let ts = timestamp.unwrap_or_else(current_timestamp);

        let mut payload = Map::new();
        payload.insert("customer_ids".into(), Value::Object(customer_ids.clone()));
        payload.insert("project_id".into(), Value::String(project_token.to_string()));
        payload.insert("type".into(), Value::String(event_type.to_string()));
        payload.insert("properties".into(), Value::Object(properties));
        payload.insert("timestamp".into(), ts.into());

        Command {
            kind: CommandKind::Event,
            endpoint: ENDPOINT_TRACK.to_string(),
            payload,
            timestamp: ts,
        }
    }

    /// A customer attribute update for `crm/customers`.
    pub fn customer(
        properties: Map<String, Value>,
        project_token: &str,
        customer_ids: &Map<String, Value>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("ids".into(), Value::Object(customer_ids.clone()));
        payload.insert("project_id".into(), Value::String(project_token.to_string()));
        payload.insert("properties".into(), Value::Object(properties));

        Command {
            kind: CommandKind::Customer,
            endpoint: ENDPOINT_UPDATE.to_string(),
            payload,
            timestamp: current_timestamp(),
        }
    }
}

/// The durable, queue-resident representation of a [`Command`].
///
/// Ids are assigned by the store on insert, strictly increase, and are never
/// reused. An entry exists from the moment `schedule` returns until it is
/// cleared as successful.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Row id assigned on insert
    pub id: i64,
    /// Resource path on the collection endpoint
    pub endpoint: String,
    /// Deserialized payload map
    pub payload: Map<String, Value>,
    /// Epoch seconds at which the record was produced
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> Map<String, Value> {
        let mut ids = Map::new();
        ids.insert("cookie".into(), json!("abc-123"));
        ids
    }

    #[test]
    fn test_event_payload_shape() {
        let mut props = Map::new();
        props.insert("level".into(), json!(3));

        let cmd = Command::event("level_up", props, Some(1000.5), "token-1", &ids());

        assert_eq!(cmd.kind, CommandKind::Event);
        assert_eq!(cmd.endpoint, ENDPOINT_TRACK);
        assert_eq!(cmd.timestamp, 1000.5);
        assert_eq!(cmd.payload["customer_ids"]["cookie"], "abc-123");
        assert_eq!(cmd.payload["project_id"], "token-1");
        assert_eq!(cmd.payload["type"], "level_up");
        assert_eq!(cmd.payload["properties"]["level"], 3);
        assert_eq!(cmd.payload["timestamp"], 1000.5);
    }

    #[test]
    fn test_event_payload_key_order() {
        let cmd = Command::event("ping", Map::new(), Some(1.0), "t", &ids());
        let keys: Vec<&str> = cmd.payload.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            ["customer_ids", "project_id", "type", "properties", "timestamp"]
        );
    }

    #[test]
    fn test_customer_payload_shape() {
        let mut props = Map::new();
        props.insert("plan".into(), json!("pro"));

        let cmd = Command::customer(props, "token-1", &ids());

        assert_eq!(cmd.kind, CommandKind::Customer);
        assert_eq!(cmd.endpoint, ENDPOINT_UPDATE);
        assert_eq!(cmd.payload["ids"]["cookie"], "abc-123");
        assert_eq!(cmd.payload["properties"]["plan"], "pro");
        assert!(cmd.payload.get("type").is_none());
    }

    #[test]
    fn test_default_timestamp_is_now() {
        let before = current_timestamp();
        let cmd = Command::event("ping", Map::new(), None, "t", &ids());
        let after = current_timestamp();
        assert!(cmd.timestamp >= before && cmd.timestamp <= after);
    }
}
