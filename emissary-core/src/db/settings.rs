//! Persistent key/value settings
//!
//! Namespaced bookkeeping values backed by the `settings` table: session
//! state for the session tracker and the tracked-identity ids merged into
//! built payloads. Each accessor is an atomic read or write on the store's
//! serialized connection.

use super::store::Store;
use crate::error::Result;
use rusqlite::OptionalExtension;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Identity key for the device-scoped anonymous id
pub const ID_COOKIE: &str = "cookie";
/// Identity key for the host-assigned registered id
pub const ID_REGISTERED: &str = "registered";

const KEY_COOKIE_ID: &str = "cookie_id";
const KEY_REGISTERED_ID: &str = "registered_id";

/// Key/value surface over the `settings` table.
#[derive(Clone)]
pub struct Settings {
    store: Arc<Store>,
}

impl Settings {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.store.connection();
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(crate::error::Error::from)
    }

    /// Insert or replace a value
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            [key, value],
        )?;
        Ok(())
    }

    /// Remove a key, if present
    pub fn remove(&self, key: &str) -> Result<()> {
        self.store
            .execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Get a numeric value; unparseable values read as absent
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.get(key)?.and_then(|v| v.parse().ok()))
    }

    /// Store a numeric value
    pub fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.set(key, &value.to_string())
    }

    /// The customer-ids map merged into built payloads.
    ///
    /// The cookie id is generated on first use and persisted; the registered
    /// id is included only once the host has set one.
    pub fn customer_ids(&self) -> Result<Map<String, Value>> {
        let mut ids = Map::new();

        let cookie = match self.get(KEY_COOKIE_ID)? {
            Some(cookie) => cookie,
            None => {
                let cookie = Uuid::new_v4().to_string();
                self.set(KEY_COOKIE_ID, &cookie)?;
                tracing::debug!(%cookie, "Generated cookie id");
                cookie
            }
        };
        ids.insert(ID_COOKIE.into(), Value::String(cookie));

        if let Some(registered) = self.get(KEY_REGISTERED_ID)? {
            ids.insert(ID_REGISTERED.into(), Value::String(registered));
        }
        Ok(ids)
    }

    /// Persist the host-assigned registered id
    pub fn set_registered_id(&self, id: &str) -> Result<()> {
        self.set(KEY_REGISTERED_ID, id)
    }
}
