//! Durable SQLite-backed store
//!
//! The store is the only component that touches disk. Opening the backing
//! file happens once at construction and failure is fatal to the whole
//! pipeline: there is no in-memory fallback, durability is the entire point.
//! Individual query failures are reported to the caller, not swallowed.

use crate::error::Result;
use rusqlite::{Connection, Params, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Store handle over a single serialized connection.
///
/// All access goes through one `Mutex<Connection>` so that id assignment and
/// ordered reads stay globally consistent.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the backing file at the given path and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps scheduled inserts durable without blocking readers
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;

        tracing::info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations on this store
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Execute a mutating query, reporting the affected-row count and the
    /// last-inserted row id.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<(usize, i64)> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(sql, params)?;
        Ok((affected, conn.last_insert_rowid()))
    }

    /// Load an ordered sequence of rows, mapped through `map`.
    pub fn load<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Get the underlying connection (for transactional use)
    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/commands.db");
        let _store = Store::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_execute_reports_insert_id() {
        let store = Store::open_in_memory().unwrap();
        let (affected, id) = store
            .execute(
                "INSERT INTO commands (endpoint, payload, timestamp) VALUES ('e', '{}', 0.0)",
                [],
            )
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(id, 1);
    }

    #[test]
    fn test_query_failure_is_surfaced() {
        let store = Store::open_in_memory().unwrap();
        let result = store.execute("INSERT INTO no_such_table (x) VALUES (1)", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_preserves_order() {
        let store = Store::open_in_memory().unwrap();
        for endpoint in ["a", "b", "c"] {
            store
                .execute(
                    "INSERT INTO commands (endpoint, payload, timestamp) VALUES (?1, '{}', 0.0)",
                    [endpoint],
                )
                .unwrap();
        }

        let endpoints = store
            .load("SELECT endpoint FROM commands ORDER BY id ASC", [], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(endpoints, ["a", "b", "c"]);
    }
}
