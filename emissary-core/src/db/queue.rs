//! Durable command queue
//!
//! Queue abstraction over the [`Store`]: enqueue, batched peek, and
//! transactional removal. Separating `pop` (non-destructive read) from
//! `clear` (destructive ack) is what gives at-least-once delivery: a crash
//! between a successful send and the clear results in redelivery.

use super::store::Store;
use crate::error::Result;
use crate::types::{Command, QueueEntry};
use std::sync::Arc;

/// FIFO queue of pending commands, backed by the `commands` table.
///
/// The queue exclusively owns the rows backing [`QueueEntry`]; nothing else
/// mutates that table.
#[derive(Clone)]
pub struct CommandQueue {
    store: Arc<Store>,
}

impl CommandQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Serialize and insert a command, returning its assigned id.
    ///
    /// Synchronous and durable before returning; never blocks on network.
    pub fn schedule(&self, command: &Command) -> Result<i64> {
        let payload = serde_json::to_string(&command.payload)?;
        let (_, id) = self.store.execute(
            "INSERT INTO commands (endpoint, payload, timestamp) VALUES (?1, ?2, ?3)",
            rusqlite::params![command.endpoint, payload, command.timestamp],
        )?;

        tracing::debug!(id, endpoint = %command.endpoint, "Command queued");
        Ok(id)
    }

    /// Return up to `limit` entries by ascending id, oldest first.
    ///
    /// Does not delete; calling again before a clear returns the same batch.
    pub fn pop(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let rows = self.store.load(
            "SELECT id, endpoint, payload, timestamp FROM commands ORDER BY id ASC LIMIT ?1",
            [limit as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, endpoint, payload, timestamp) in rows {
            entries.push(QueueEntry {
                id,
                endpoint,
                payload: serde_json::from_str(&payload)?,
                timestamp,
            });
        }
        Ok(entries)
    }

    /// Number of pending commands
    pub fn len(&self) -> Result<u64> {
        let counts = self
            .store
            .load("SELECT COUNT(*) FROM commands", [], |row| {
                row.get::<_, i64>(0)
            })?;
        Ok(counts.first().copied().unwrap_or(0) as u64)
    }

    /// True iff no rows remain
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove acknowledged rows in one transaction.
    ///
    /// Rows whose id is in `successful` are permanently deleted; rows in
    /// `failed` stay put for a future pop. Ids in neither list are untouched.
    /// This is the sole removal path.
    pub fn clear(&self, successful: &[i64], failed: &[i64]) -> Result<usize> {
        let mut conn = self.store.connection();
        let tx = conn.transaction()?;

        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM commands WHERE id = ?1")?;
            for id in successful {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;

        if !failed.is_empty() {
            tracing::debug!(count = failed.len(), "Commands left queued for retry");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::current_timestamp;
    use serde_json::Map;

    fn command(endpoint: &str) -> Command {
        Command::generic(endpoint, Map::new(), Some(current_timestamp()))
    }

    fn queue() -> CommandQueue {
        CommandQueue::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn test_schedule_assigns_increasing_ids() {
        let queue = queue();
        let a = queue.schedule(&command("a")).unwrap();
        let b = queue.schedule(&command("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_pop_is_fifo_and_non_destructive() {
        let queue = queue();
        queue.schedule(&command("first")).unwrap();
        queue.schedule(&command("second")).unwrap();

        let batch = queue.pop(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].endpoint, "first");
        assert_eq!(batch[1].endpoint, "second");

        // pop again without clearing: identical batch
        let again = queue.pop(10).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].id, batch[0].id);
    }

    #[test]
    fn test_pop_respects_limit() {
        let queue = queue();
        for i in 0..5 {
            queue.schedule(&command(&format!("e{}", i))).unwrap();
        }
        assert_eq!(queue.pop(3).unwrap().len(), 3);
    }

    #[test]
    fn test_clear_removes_only_successful() {
        // Scenario: schedule 3 commands; pop(2) returns the two oldest;
        // clearing them leaves the third poppable.
        let queue = queue();
        let ids: Vec<i64> = (0..3)
            .map(|i| queue.schedule(&command(&format!("e{}", i))).unwrap())
            .collect();

        let batch = queue.pop(2).unwrap();
        assert_eq!(batch[0].id, ids[0]);
        assert_eq!(batch[1].id, ids[1]);

        let removed = queue.clear(&[ids[0], ids[1]], &[]).unwrap();
        assert_eq!(removed, 2);
        assert!(!queue.is_empty().unwrap());

        let rest = queue.pop(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[2]);
    }

    #[test]
    fn test_cleared_ids_never_return_and_failed_ids_remain() {
        let queue = queue();
        let a = queue.schedule(&command("a")).unwrap();
        let b = queue.schedule(&command("b")).unwrap();

        queue.clear(&[a], &[b]).unwrap();

        let remaining = queue.pop(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
    }

    #[test]
    fn test_clear_of_unknown_ids_is_harmless() {
        let queue = queue();
        let id = queue.schedule(&command("a")).unwrap();
        let removed = queue.clear(&[id + 100], &[]).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_payload_round_trips() {
        let queue = queue();
        let mut payload = Map::new();
        payload.insert("type".into(), serde_json::json!("level_up"));
        payload.insert("count".into(), serde_json::json!(7));
        let cmd = Command::generic("crm/events", payload, Some(42.5));

        queue.schedule(&cmd).unwrap();
        let entry = &queue.pop(1).unwrap()[0];

        assert_eq!(entry.endpoint, "crm/events");
        assert_eq!(entry.timestamp, 42.5);
        assert_eq!(entry.payload["type"], "level_up");
        assert_eq!(entry.payload["count"], 7);
    }

    #[test]
    fn test_unacknowledged_commands_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.db");

        let survivor;
        {
            let queue = CommandQueue::new(Arc::new(Store::open(&path).unwrap()));
            let a = queue.schedule(&command("acked")).unwrap();
            survivor = queue.schedule(&command("pending")).unwrap();
            queue.clear(&[a], &[]).unwrap();
        }

        // Reopen: exactly the unacknowledged set, none lost, none fabricated
        let queue = CommandQueue::new(Arc::new(Store::open(&path).unwrap()));
        let entries = queue.pop(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, survivor);
        assert_eq!(entries[0].endpoint, "pending");
    }

    #[test]
    fn test_empty_queue() {
        let queue = queue();
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.len().unwrap(), 0);
        assert!(queue.pop(10).unwrap().is_empty());
    }
}
