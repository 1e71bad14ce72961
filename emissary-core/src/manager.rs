//! Command manager: accepts new commands and owns the flush protocol
//!
//! `schedule` returns as soon as the command is durably queued; delivery
//! happens later, on a manual [`CommandManager::flush`] or on the recurring
//! timer. One flush drains the queue batch by batch and resolves each
//! delivery outcome back into the queue: acknowledged rows are cleared,
//! rejected or unreachable batches stay put for the next cycle. Failed
//! batches are retried unbounded, which makes delivery at-least-once; the
//! endpoint may see duplicates after a crash between send and clear.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::DeliveryConfig;
use crate::db::{CommandQueue, Store};
use crate::delivery::protocol::{BulkRequest, BulkResponse, CommandResult};
use crate::delivery::Delivery;
use crate::error::Result;
use crate::types::{Command, QueueEntry};

/// Orchestrator over the queue and the transport.
///
/// Cheap to clone; clones share the queue, the transport, and the flush
/// guard.
#[derive(Clone)]
pub struct CommandManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    queue: CommandQueue,
    delivery: Arc<dyn Delivery>,
    bulk_url: String,
    batch_size: usize,
    flush_interval: Duration,
    /// Reentrancy guard: at most one flush at a time
    flush_gate: tokio::sync::Mutex<()>,
    /// Stop signal for the recurring flush task, when enabled
    auto_flush: Mutex<Option<watch::Sender<bool>>>,
}

impl CommandManager {
    pub fn new(store: Arc<Store>, delivery: Arc<dyn Delivery>, config: &DeliveryConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                queue: CommandQueue::new(store),
                delivery,
                bulk_url: config.bulk_url(),
                batch_size: config.batch_size,
                flush_interval: Duration::from_secs(config.flush_interval_secs),
                flush_gate: tokio::sync::Mutex::new(()),
                auto_flush: Mutex::new(None),
            }),
        }
    }

    /// Durably queue a command for later delivery.
    ///
    /// Returns the assigned queue id once persisted; never waits for the
    /// network. A storage failure here means the command is lost; callers
    /// treat scheduling as best-effort durable, contingent on storage health.
    pub fn schedule(&self, command: &Command) -> Result<i64> {
        self.inner.queue.schedule(command)
    }

    /// Drain the queue, one batch per delivery attempt.
    ///
    /// Returns the number of commands delivered. A flush arriving while one
    /// is already running is a coalesced no-op. A failed batch ends the
    /// cycle; its rows stay queued for the next triggered flush.
    pub async fn flush(&self) -> Result<usize> {
        let inner = &self.inner;
        let _gate = match inner.flush_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                tracing::debug!("Flush already in progress, coalescing");
                return Ok(0);
            }
        };

        let mut delivered = 0;
        loop {
            let batch = inner.queue.pop(inner.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let body = serde_json::to_value(BulkRequest::from_entries(&batch))?;
            let all_ids: Vec<i64> = batch.iter().map(|e| e.id).collect();

            let outcome = inner
                .delivery
                .post(&inner.bulk_url, &body)
                .await
                .and_then(BulkResponse::from_value);

            let response = match outcome {
                Ok(response) if response.success => response,
                Ok(_) => {
                    tracing::warn!(batch = all_ids.len(), "Endpoint rejected batch, will retry");
                    inner.queue.clear(&[], &all_ids)?;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, batch = all_ids.len(), "Delivery failed, will retry");
                    inner.queue.clear(&[], &all_ids)?;
                    break;
                }
            };

            let (successful, failed) = resolve_batch(&batch, &response.results);
            delivered += successful.len();
            inner.queue.clear(&successful, &failed)?;
            tracing::debug!(
                delivered = successful.len(),
                retried = failed.len(),
                "Batch resolved"
            );

            // Endpoint asked for some commands again; let the next cycle
            // resend them instead of busy-looping here.
            if !failed.is_empty() {
                break;
            }
        }

        Ok(delivered)
    }

    /// Start a recurring task that flushes at the configured interval.
    ///
    /// Enabling while already enabled is a no-op.
    pub fn enable_automatic_flushing(&self) {
        let mut slot = self.inner.auto_flush.lock().unwrap();
        if slot.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let manager = self.clone();
        let period = self.inner.flush_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.flush().await {
                            tracing::warn!(error = %e, "Scheduled flush failed");
                        }
                    }
                }
            }
            tracing::debug!("Automatic flushing stopped");
        });

        *slot = Some(tx);
        tracing::debug!(period_secs = period.as_secs(), "Automatic flushing enabled");
    }

    /// Stop future timer-triggered flushes.
    ///
    /// An in-progress flush is left to finish; only future firings stop.
    pub fn disable_automatic_flushing(&self) {
        if let Some(tx) = self.inner.auto_flush.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }
}

/// Split a batch into cleared and retried ids per the endpoint's statuses.
///
/// Statuses align positionally with the batch; commands the response does
/// not cover count as delivered.
fn resolve_batch(batch: &[QueueEntry], results: &[CommandResult]) -> (Vec<i64>, Vec<i64>) {
    let mut successful = Vec::with_capacity(batch.len());
    let mut failed = Vec::new();

    for (idx, entry) in batch.iter().enumerate() {
        match results.get(idx) {
            Some(result) if result.is_retry() => failed.push(entry.id),
            _ => successful.push(entry.id),
        }
    }
    (successful, failed)
}
