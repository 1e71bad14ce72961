//! Session lifecycle tracking
//!
//! A session is a bounded span of app activity, bounded by an inactivity
//! timeout. The tracker is a two-state machine driven by the host's
//! foreground/background transitions: foregrounding past the timeout closes
//! the expired session retroactively (a `session_end` event carrying the
//! measured duration) and opens a new one (`session_start`); backgrounding
//! only records the last-active instant. Session boundaries are therefore
//! inferred lazily, never push-emitted.
//!
//! Session id and timestamps round-trip through [`Settings`] so a process
//! restart within the timeout does not spuriously start a new session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{SessionConfig, TrackerConfig};
use crate::db::Settings;
use crate::error::Result;
use crate::manager::CommandManager;
use crate::types::{
    current_timestamp, Command, EVENT_SESSION_END, EVENT_SESSION_START, PROPERTY_APP_VERSION,
    PROPERTY_DURATION,
};

const KEY_SESSION_ID: &str = "session_id";
const KEY_STARTED_AT: &str = "session_started_at";
const KEY_LAST_ACTIVE_AT: &str = "session_last_active_at";

/// Lifecycle state machine emitting session-boundary commands.
///
/// Cheap to clone; clones share state. The tracker exclusively owns the
/// persisted session keys.
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    settings: Settings,
    manager: CommandManager,
    project_token: String,
    app_version: Option<String>,
    /// Seconds of background inactivity after which a session expires
    timeout: f64,
    heartbeat: Duration,
    /// Serializes transitions so foreground/background events never
    /// interleave into a torn read of the persisted state
    phase: Mutex<Phase>,
    ticker: Mutex<Option<watch::Sender<bool>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Active,
}

/// Session state as round-tripped through settings
struct PersistedSession {
    id: String,
    started_at: f64,
    last_active_at: f64,
}

impl SessionTracker {
    pub fn new(
        settings: Settings,
        manager: CommandManager,
        tracker: &TrackerConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                settings,
                manager,
                project_token: tracker.project_token.clone(),
                app_version: tracker.app_version.clone(),
                timeout: session.timeout_secs,
                heartbeat: Duration::from_secs(session.heartbeat_secs),
                phase: Mutex::new(Phase::Inactive),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// The host came to the foreground.
    ///
    /// Resuming within the timeout keeps the current session and emits
    /// nothing. Past the timeout (or with no session at all) the expired
    /// session, if any, is closed and a new one started.
    pub fn on_foreground(&self) -> Result<()> {
        let mut phase = self.inner.phase.lock().unwrap();
        let now = current_timestamp();

        match self.load_session()? {
            Some(session) if now - session.last_active_at <= self.inner.timeout => {
                self.inner.settings.set_f64(KEY_LAST_ACTIVE_AT, now)?;
                *phase = Phase::Active;
                tracing::debug!(session_id = %session.id, "Session resumed");
            }
            expired => {
                if let Some(session) = expired {
                    self.emit_session_end(&session)?;
                }
                self.start_session(now)?;
                *phase = Phase::Active;
            }
        }
        Ok(())
    }

    /// The host went to the background.
    ///
    /// Records the last-active instant; the session stays Active but is now
    /// eligible for expiry on the next foreground check. No command emitted.
    pub fn on_background(&self) -> Result<()> {
        let _phase = self.inner.phase.lock().unwrap();
        if self.inner.settings.get(KEY_SESSION_ID)?.is_some() {
            self.inner
                .settings
                .set_f64(KEY_LAST_ACTIVE_AT, current_timestamp())?;
        }
        Ok(())
    }

    /// One re-validation pass over the persisted state.
    ///
    /// Active: refresh the keep-alive instant so a long foreground stretch
    /// without background events never reads as expired. Inactive: close a
    /// session that expired while the process was away, so the next
    /// foreground starts fresh.
    pub fn tick(&self) -> Result<()> {
        let phase = self.inner.phase.lock().unwrap();
        let now = current_timestamp();

        match *phase {
            Phase::Active => {
                if self.inner.settings.get(KEY_SESSION_ID)?.is_some() {
                    self.inner.settings.set_f64(KEY_LAST_ACTIVE_AT, now)?;
                }
            }
            Phase::Inactive => {
                if let Some(session) = self.load_session()? {
                    if now - session.last_active_at > self.inner.timeout {
                        self.emit_session_end(&session)?;
                        self.clear_session()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Start the periodic re-validation task.
    ///
    /// Running while already running is a no-op.
    pub fn run(&self) {
        let mut slot = self.inner.ticker.lock().unwrap();
        if slot.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let tracker = self.clone();
        let period = self.inner.heartbeat;

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
                        if let Err(e) = tracker.tick() {
                            tracing::warn!(error = %e, "Session re-validation failed");
                        }
                    }
                }
            }
        });

        *slot = Some(tx);
    }

    /// Stop the periodic re-validation task
    pub fn stop(&self) {
        if let Some(tx) = self.inner.ticker.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }

    /// The current session id, if a session is persisted
    pub fn current_session_id(&self) -> Result<Option<String>> {
        self.inner.settings.get(KEY_SESSION_ID)
    }

    fn start_session(&self, now: f64) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        self.inner.settings.set(KEY_SESSION_ID, &id)?;
        self.inner.settings.set_f64(KEY_STARTED_AT, now)?;
        self.inner.settings.set_f64(KEY_LAST_ACTIVE_AT, now)?;

        let ids = self.inner.settings.customer_ids()?;
        let command = Command::event(
            EVENT_SESSION_START,
            self.session_properties(),
            Some(now),
            &self.inner.project_token,
            &ids,
        );
        self.inner.manager.schedule(&command)?;

        tracing::info!(session_id = %id, "Session started");
        Ok(())
    }

    fn emit_session_end(&self, session: &PersistedSession) -> Result<()> {
        let duration = (session.last_active_at - session.started_at).max(0.0);

        let mut properties = self.session_properties();
        properties.insert(PROPERTY_DURATION.into(), duration.into());

        let ids = self.inner.settings.customer_ids()?;
        // The end happened at the last-active instant, not now
        let command = Command::event(
            EVENT_SESSION_END,
            properties,
            Some(session.last_active_at),
            &self.inner.project_token,
            &ids,
        );
        self.inner.manager.schedule(&command)?;

        tracing::info!(session_id = %session.id, duration, "Session ended");
        Ok(())
    }

    fn session_properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        if let Some(version) = &self.inner.app_version {
            properties.insert(PROPERTY_APP_VERSION.into(), Value::String(version.clone()));
        }
        properties
    }

    fn load_session(&self) -> Result<Option<PersistedSession>> {
        let id = match self.inner.settings.get(KEY_SESSION_ID)? {
            Some(id) => id,
            None => return Ok(None),
        };
        let last_active_at = match self.inner.settings.get_f64(KEY_LAST_ACTIVE_AT)? {
            Some(value) => value,
            None => return Ok(None),
        };
        let started_at = self
            .inner
            .settings
            .get_f64(KEY_STARTED_AT)?
            .unwrap_or(last_active_at);

        Ok(Some(PersistedSession {
            id,
            started_at,
            last_active_at,
        }))
    }

    fn clear_session(&self) -> Result<()> {
        self.inner.settings.remove(KEY_SESSION_ID)?;
        self.inner.settings.remove(KEY_STARTED_AT)?;
        self.inner.settings.remove(KEY_LAST_ACTIVE_AT)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::db::{CommandQueue, Store};
    use crate::delivery::Delivery;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullDelivery;

    #[async_trait]
    impl Delivery for NullDelivery {
        async fn post(&self, _url: &str, _body: &Value) -> Result<Value> {
            Ok(json!({"success": true}))
        }

        async fn get(&self, _url: &str) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn fixture(timeout_secs: f64) -> (SessionTracker, CommandQueue, Settings) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let settings = Settings::new(store.clone());
        let manager = CommandManager::new(
            store.clone(),
            Arc::new(NullDelivery),
            &DeliveryConfig::default(),
        );
        let tracker_config = TrackerConfig {
            project_token: "tok".to_string(),
            app_version: Some("1.0.0".to_string()),
        };
        let session_config = SessionConfig {
            timeout_secs,
            heartbeat_secs: 10,
        };
        let tracker = SessionTracker::new(settings.clone(), manager, &tracker_config, &session_config);
        (tracker, CommandQueue::new(store), settings)
    }

    fn event_types(queue: &CommandQueue) -> Vec<String> {
        queue
            .pop(100)
            .unwrap()
            .iter()
            .map(|e| e.payload["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_first_foreground_starts_a_session() {
        let (tracker, queue, _settings) = fixture(60.0);

        tracker.on_foreground().unwrap();

        assert_eq!(event_types(&queue), [EVENT_SESSION_START]);
        assert!(tracker.current_session_id().unwrap().is_some());

        let entry = &queue.pop(1).unwrap()[0];
        assert_eq!(entry.payload["project_id"], "tok");
        assert_eq!(entry.payload["properties"]["app_version"], "1.0.0");
        assert!(!entry.payload["customer_ids"]["cookie"]
            .as_str()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resume_within_timeout_emits_nothing() {
        // Background for 5 seconds against a 60 second timeout: same
        // session, no command.
        let (tracker, queue, settings) = fixture(60.0);

        tracker.on_foreground().unwrap();
        let session_id = tracker.current_session_id().unwrap();
        let start_commands = queue.pop(100).unwrap();
        let ids: Vec<i64> = start_commands.iter().map(|e| e.id).collect();
        queue.clear(&ids, &[]).unwrap();

        settings
            .set_f64(KEY_LAST_ACTIVE_AT, current_timestamp() - 5.0)
            .unwrap();
        tracker.on_foreground().unwrap();

        assert!(queue.is_empty().unwrap());
        assert_eq!(tracker.current_session_id().unwrap(), session_id);
    }

    #[test]
    fn test_foreground_past_timeout_rolls_the_session() {
        // Background for 120 seconds against a 60 second timeout: the old
        // session is closed retroactively, then a new one starts.
        let (tracker, queue, settings) = fixture(60.0);

        tracker.on_foreground().unwrap();
        let first_id = tracker.current_session_id().unwrap();
        let ids: Vec<i64> = queue.pop(100).unwrap().iter().map(|e| e.id).collect();
        queue.clear(&ids, &[]).unwrap();

        let now = current_timestamp();
        settings.set_f64(KEY_STARTED_AT, now - 180.0).unwrap();
        settings.set_f64(KEY_LAST_ACTIVE_AT, now - 120.0).unwrap();
        tracker.on_foreground().unwrap();

        assert_eq!(event_types(&queue), [EVENT_SESSION_END, EVENT_SESSION_START]);
        assert_ne!(tracker.current_session_id().unwrap(), first_id);

        // The end event carries the measured duration and the end instant
        let end = &queue.pop(1).unwrap()[0];
        let duration = end.payload["properties"]["duration"].as_f64().unwrap();
        assert!((duration - 60.0).abs() < 1.0);
        let end_ts = end.payload["timestamp"].as_f64().unwrap();
        assert!((end_ts - (now - 120.0)).abs() < 1.0);
    }

    #[test]
    fn test_background_records_last_active() {
        let (tracker, _queue, settings) = fixture(60.0);

        tracker.on_foreground().unwrap();
        settings
            .set_f64(KEY_LAST_ACTIVE_AT, current_timestamp() - 30.0)
            .unwrap();

        tracker.on_background().unwrap();

        let last_active = settings.get_f64(KEY_LAST_ACTIVE_AT).unwrap().unwrap();
        assert!(current_timestamp() - last_active < 1.0);
    }

    #[test]
    fn test_tick_keeps_an_active_session_alive() {
        let (tracker, _queue, settings) = fixture(60.0);

        tracker.on_foreground().unwrap();
        settings
            .set_f64(KEY_LAST_ACTIVE_AT, current_timestamp() - 30.0)
            .unwrap();

        tracker.tick().unwrap();

        let last_active = settings.get_f64(KEY_LAST_ACTIVE_AT).unwrap().unwrap();
        assert!(current_timestamp() - last_active < 1.0);
    }

    #[test]
    fn test_tick_closes_a_session_expired_while_away() {
        // Simulates a relaunch after the timeout elapsed while backgrounded:
        // the persisted session is closed lazily, without a foreground event.
        let (tracker, queue, settings) = fixture(60.0);

        let now = current_timestamp();
        settings.set(KEY_SESSION_ID, "stale-session").unwrap();
        settings.set_f64(KEY_STARTED_AT, now - 300.0).unwrap();
        settings.set_f64(KEY_LAST_ACTIVE_AT, now - 200.0).unwrap();

        tracker.tick().unwrap();

        assert_eq!(event_types(&queue), [EVENT_SESSION_END]);
        assert!(tracker.current_session_id().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_closes_an_expired_session_in_the_background() {
        let (tracker, queue, settings) = fixture(60.0);

        let now = current_timestamp();
        settings.set(KEY_SESSION_ID, "stale-session").unwrap();
        settings.set_f64(KEY_STARTED_AT, now - 300.0).unwrap();
        settings.set_f64(KEY_LAST_ACTIVE_AT, now - 200.0).unwrap();

        tracker.run();
        for _ in 0..100 {
            if !queue.is_empty().unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracker.stop();

        assert_eq!(event_types(&queue), [EVENT_SESSION_END]);
        assert!(tracker.current_session_id().unwrap().is_none());
    }

    #[test]
    fn test_tick_leaves_an_unexpired_session_for_resumption() {
        let (tracker, queue, settings) = fixture(60.0);

        let now = current_timestamp();
        settings.set(KEY_SESSION_ID, "recent-session").unwrap();
        settings.set_f64(KEY_STARTED_AT, now - 30.0).unwrap();
        settings.set_f64(KEY_LAST_ACTIVE_AT, now - 10.0).unwrap();

        tracker.tick().unwrap();

        assert!(queue.is_empty().unwrap());
        assert_eq!(
            tracker.current_session_id().unwrap().as_deref(),
            Some("recent-session")
        );

        // And the next foreground resumes it
        tracker.on_foreground().unwrap();
        assert!(queue.is_empty().unwrap());
    }
}
