//! Session registry: the single owner of live sessions and closed snapshots.

use super::handshake::{HandshakeContext, dispatch, spawn_producer};
use super::notify::{ChangeEvent, ChangeKind, ChangeNotifier};
use super::record::{ClosedSnapshot, KeyState, SessionInfo, SessionKey, SessionRecord, StatusReport};
use super::run_bounded;
use super::status::{SessionStatus, StatusClock};
use crate::Result;
use crate::adapters::Driver;
use crate::analyzer::AnalyzerRegistry;
use crate::config::SessionConfig;
use crate::error::TinyDbError;
use crate::models::{DatabaseStructure, ServerVersion};
use crate::store::ConnectionStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub(super) type Slot = Arc<tokio::sync::Mutex<KeyState>>;

/// Owns every live session and enforces one live session per key.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use tinydb_core::adapters::EngineDriver;
/// use tinydb_core::config::SessionConfig;
/// use tinydb_core::session::SessionRegistry;
/// use tinydb_core::store::JsonLinesStore;
///
/// # async fn example() -> tinydb_core::Result<()> {
/// let config = SessionConfig::default();
/// let registry = SessionRegistry::new(
///     Arc::new(JsonLinesStore::new("connections.jsonl")),
///     Arc::new(EngineDriver::new(config.clone())),
///     config,
/// )?;
///
/// let session = registry.ensure_open("c1", "app").await?;
/// println!("{} is {}", session.key, session.status.name);
/// registry.close("c1", "app", false).await;
/// # Ok(())
/// # }
/// ```
pub struct SessionRegistry {
    store: Arc<dyn ConnectionStore>,
    driver: Arc<dyn Driver>,
    analyzers: AnalyzerRegistry,
    pub(super) config: SessionConfig,
    pub(super) clock: Arc<StatusClock>,
    pub(super) notifier: ChangeNotifier,
    /// Slots are never removed, so one mutex governs a key for good
    slots: Mutex<HashMap<SessionKey, Slot>>,
    /// Cancel token of the newest session per key, reachable without the
    /// key's lock so a forced close can interrupt a running handshake
    cancels: Mutex<HashMap<SessionKey, CancellationToken>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("analyzers", &self.analyzers)
            .field("keys", &self.lock_slots().len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates a registry over a connection store and a driver.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        driver: Arc<dyn Driver>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            driver,
            analyzers: AnalyzerRegistry::default(),
            notifier: ChangeNotifier::new(config.notification_capacity),
            config,
            clock: Arc::new(StatusClock::new()),
            slots: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Builder method to replace the analyzer registry.
    pub fn with_analyzers(mut self, analyzers: AnalyzerRegistry) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// Session bounds in effect
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &SessionKey) -> Slot {
        Arc::clone(self.lock_slots().entry(key.clone()).or_default())
    }

    fn lock_cancels(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels the newest session of the key without waiting for its lock.
    fn cancel_in_flight(&self, key: &SessionKey) {
        if let Some(token) = self.lock_cancels().get(key) {
            token.cancel();
        }
    }

    pub(super) fn existing_slot(&self, key: &SessionKey) -> Option<Slot> {
        self.lock_slots().get(key).cloned()
    }

    fn slots_for(&self, connection_id: Option<&str>) -> Vec<(SessionKey, Slot)> {
        let mut slots: Vec<(SessionKey, Slot)> = self
            .lock_slots()
            .iter()
            .filter(|(key, _)| connection_id.is_none_or(|id| key.connection_id == id))
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Returns the live session for the key, opening it if needed.
    ///
    /// Opening runs the full handshake before returning. A handshake that
    /// fails leaves the record live with an `error` status until it is
    /// closed; a link lost during the handshake closes it again.
    ///
    /// # Errors
    /// Returns [`TinyDbError::NotFound`] for unknown connection ids, in
    /// which case nothing is registered
    pub async fn ensure_open(&self, connection_id: &str, database: &str) -> Result<SessionInfo> {
        if connection_id.trim().is_empty() {
            return Err(TinyDbError::validation("connection id cannot be empty"));
        }
        let key = SessionKey::new(connection_id, database);

        if let Some(slot) = self.existing_slot(&key) {
            let state = slot.lock().await;
            if let Some(record) = &state.live {
                return Ok(record.info());
            }
        }

        if self.shutdown.is_cancelled() {
            return Err(TinyDbError::cancelled("Open session"));
        }

        let description = match self.store.resolve(connection_id).await {
            Ok(description) => Arc::new(description),
            Err(e) => {
                tracing::debug!("Cannot open {}: {}", key, e);
                return Err(e);
            }
        };

        let mut state = self.slot(&key).lock_owned().await;
        // Another caller may have opened the key while we resolved
        if let Some(record) = &state.live {
            return Ok(record.info());
        }

        let record = SessionRecord::pending(
            key.clone(),
            Arc::clone(&description),
            SessionStatus::pending(self.clock.tick(), "Connecting"),
            state.closed.as_ref(),
            self.shutdown.child_token(),
        );
        let session_id = record.session_id;
        self.lock_cancels().insert(key.clone(), record.cancel.clone());
        let context = HandshakeContext {
            driver: Arc::clone(&self.driver),
            analyzer: self.analyzers.for_engine(description.engine),
            description: Arc::clone(&description),
            database: database.to_string(),
            previous: record.structure.clone(),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            cancel: record.cancel.clone(),
        };
        state.live = Some(record);
        self.notifier.emit(ChangeKind::Status, &key);

        tracing::info!(
            connection_id = %key.connection_id,
            database = %key.database,
            session_id = %session_id,
            "Opening {} session for {}",
            description.engine,
            description.label()
        );

        let (rx, producer) = spawn_producer(context);
        let dispatcher = tokio::spawn(dispatch(
            state,
            session_id,
            rx,
            producer,
            Arc::clone(&self.clock),
            self.notifier.clone(),
        ));

        dispatcher
            .await
            .map_err(|e| TinyDbError::handshake(format!("Handshake for {} aborted: {}", key, e)))?
    }

    /// Closes the live session for the key.
    ///
    /// Returns false when no live session existed. `force` cancels in-flight
    /// requests and any running handshake, and terminates the driver session
    /// without waiting.
    pub async fn close(&self, connection_id: &str, database: &str, force: bool) -> bool {
        let key = SessionKey::new(connection_id, database);
        let Some(slot) = self.existing_slot(&key) else {
            return false;
        };

        // A running handshake holds the key's lock until it finishes
        if force {
            self.cancel_in_flight(&key);
        }

        let closed = slot.lock().await.close_transition();
        match closed {
            Some(record) => {
                release(&self.notifier, record, force).await;
                true
            }
            None => false,
        }
    }

    /// Closes every live session of a connection; returns how many closed.
    pub async fn close_all(&self, connection_id: &str, force: bool) -> usize {
        let mut count = 0_usize;
        for (key, _) in self.slots_for(Some(connection_id)) {
            if self.close(&key.connection_id, &key.database, force).await {
                count = count.saturating_add(1);
            }
        }
        if count > 0 {
            tracing::info!("Closed {} session(s) of connection {}", count, connection_id);
        }
        count
    }

    /// Force-closes the live session for the key.
    pub async fn disconnect(&self, connection_id: &str, database: &str) -> bool {
        self.close(connection_id, database, true).await
    }

    /// Reports the key's status without opening anything.
    ///
    /// Live sessions report their record, closed keys their snapshot, and
    /// keys never opened `{error, "Not connected"}`.
    pub async fn status(&self, connection_id: &str, database: &str) -> StatusReport {
        match self.existing_slot(&SessionKey::new(connection_id, database)) {
            Some(slot) => slot.lock().await.report(),
            None => KeyState::default().report(),
        }
    }

    /// Pings the live session, or opens one when the key is not live.
    ///
    /// A failed ping is recorded as an `error` status; a lost link also
    /// closes the session. Either way the failure is reported through the
    /// returned status.
    ///
    /// # Errors
    /// Returns an error only when opening the key fails outright
    pub async fn ping(&self, connection_id: &str, database: &str) -> Result<StatusReport> {
        let key = SessionKey::new(connection_id, database);

        let target = match self.existing_slot(&key) {
            Some(slot) => {
                let state = slot.lock().await;
                match &state.live {
                    Some(record) => match &record.adapter {
                        Some(adapter) => Some((
                            Arc::clone(&slot),
                            record.session_id,
                            Arc::clone(adapter),
                            record.cancel.clone(),
                        )),
                        // Failed handshake: nothing to ping until reopened
                        None => return Ok(state.report()),
                    },
                    None => None,
                }
            }
            None => None,
        };

        let Some((slot, session_id, adapter, cancel)) = target else {
            self.ensure_open(connection_id, database).await?;
            return Ok(self.status(connection_id, database).await);
        };

        let counter = self.clock.tick();
        let outcome = run_bounded("Ping", self.config.connect_timeout, &cancel, adapter.ping()).await;

        let mut state = slot.lock().await;
        let mut closed = None;
        if let Some(record) = state.live_session_mut(session_id) {
            let status = match &outcome {
                Ok(()) => SessionStatus::ok(counter),
                Err(e) => SessionStatus::error(counter, e.to_string()),
            };
            if record.status.apply(status) {
                self.notifier.emit(ChangeKind::Status, &key);
            }
            if let Err(e) = &outcome {
                tracing::warn!(session_id = %session_id, "Ping of {} failed: {}", key, e);
                if e.is_transport() {
                    closed = state.close_transition();
                }
            }
        }
        let report = state.report();
        drop(state);

        if let Some(record) = closed {
            release(&self.notifier, record, false).await;
        }
        Ok(report)
    }

    /// Re-runs the handshake for the key.
    ///
    /// Unless `keep_open` is set the live session is force-closed first, so
    /// structure and version are fetched again.
    ///
    /// # Errors
    /// Same as [`SessionRegistry::ensure_open`]
    pub async fn refresh(&self, connection_id: &str, database: &str, keep_open: bool) -> Result<SessionInfo> {
        if !keep_open {
            self.close(connection_id, database, true).await;
        }
        self.ensure_open(connection_id, database).await
    }

    /// Structure of the key's database, opening the session if needed.
    ///
    /// # Errors
    /// Same as [`SessionRegistry::ensure_open`]
    pub async fn structure(&self, connection_id: &str, database: &str) -> Result<Option<DatabaseStructure>> {
        Ok(self.ensure_open(connection_id, database).await?.structure)
    }

    /// Server version of the key's session, opening it if needed.
    ///
    /// # Errors
    /// Same as [`SessionRegistry::ensure_open`]
    pub async fn server_version(&self, connection_id: &str, database: &str) -> Result<Option<ServerVersion>> {
        Ok(self.ensure_open(connection_id, database).await?.server_version)
    }

    /// Last closed snapshot of the key
    pub async fn closed_snapshot(&self, connection_id: &str, database: &str) -> Option<ClosedSnapshot> {
        let slot = self.existing_slot(&SessionKey::new(connection_id, database))?;
        let state = slot.lock().await;
        state.closed.clone()
    }

    /// Keys with a live session, sorted.
    pub async fn live_keys(&self) -> Vec<SessionKey> {
        let mut keys = Vec::new();
        for (key, slot) in self.slots_for(None) {
            if slot.lock().await.live.is_some() {
                keys.push(key);
            }
        }
        keys
    }

    /// Number of live sessions
    pub async fn live_count(&self) -> usize {
        self.live_keys().await.len()
    }

    /// Cancels in-flight work and force-closes every session.
    ///
    /// Opening new sessions fails afterwards.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let mut count = 0_usize;
        for (key, _) in self.slots_for(None) {
            if self.close(&key.connection_id, &key.database, true).await {
                count = count.saturating_add(1);
            }
        }
        tracing::info!("Session registry shut down, {} session(s) closed", count);
        count
    }
}

/// Finishes a close transition after the key's lock was released.
///
/// Emits the status notification and releases the driver session.
pub(super) async fn release(notifier: &ChangeNotifier, record: SessionRecord, force: bool) {
    notifier.emit(ChangeKind::Status, &record.key);
    tracing::info!(
        connection_id = %record.key.connection_id,
        database = %record.key.database,
        session_id = %record.session_id,
        "Closed session {}",
        record.key
    );

    if force {
        record.cancel.cancel();
    }
    if let Some(adapter) = record.adapter {
        if force {
            adapter.terminate().await;
        } else {
            adapter.close().await;
        }
    }
}
