//! Session records, closed snapshots and the per-key state holding them.

use super::status::SessionStatus;
use crate::adapters::DatabaseAdapter;
use crate::config::ConnectionDescription;
use crate::models::{DatabaseStructure, DatabaseType, ServerVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity of a session: one stored connection and one database on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub connection_id: String,
    pub database: String,
}

impl SessionKey {
    /// Creates a key
    pub fn new(connection_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            database: database.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.database)
    }
}

/// A live (or closing) session for one key.
///
/// Only the registry mutates records, always while holding the key's lock.
pub(crate) struct SessionRecord {
    pub(crate) session_id: Uuid,
    pub(crate) key: SessionKey,
    pub(crate) description: Arc<ConnectionDescription>,
    pub(crate) status: SessionStatus,
    pub(crate) structure: Option<DatabaseStructure>,
    pub(crate) server_version: Option<ServerVersion>,
    pub(crate) analysed_time: Option<DateTime<Utc>>,
    pub(crate) disconnected: bool,
    pub(crate) adapter: Option<Arc<dyn DatabaseAdapter>>,
    /// Serializes requests against the adapter
    pub(crate) query_gate: Arc<tokio::sync::Mutex<()>>,
    /// Cancelled when the record is force-closed
    pub(crate) cancel: CancellationToken,
}

impl SessionRecord {
    /// Creates a pending record, seeded with a previous snapshot's structure.
    pub(crate) fn pending(
        key: SessionKey,
        description: Arc<ConnectionDescription>,
        status: SessionStatus,
        seed: Option<&ClosedSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            key,
            description,
            status,
            structure: seed.and_then(|s| s.structure.clone()),
            server_version: None,
            analysed_time: seed.and_then(|s| s.analysed_time),
            disconnected: false,
            adapter: None,
            query_gate: Arc::new(tokio::sync::Mutex::new(())),
            cancel,
        }
    }

    /// Checks whether this record is the still-open session `session_id`.
    pub(crate) fn is_session(&self, session_id: Uuid) -> bool {
        self.session_id == session_id && !self.disconnected
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            key: self.key.clone(),
            engine: self.description.engine,
            status: self.status.clone(),
            structure: self.structure.clone(),
            server_version: self.server_version.clone(),
            analysed_time: self.analysed_time,
            disconnected: self.disconnected,
        }
    }

    pub(crate) fn snapshot(&self) -> ClosedSnapshot {
        let message = self
            .status
            .message
            .clone()
            .unwrap_or_else(|| "Connection closed".to_string());
        ClosedSnapshot {
            structure: self.structure.clone(),
            analysed_time: self.analysed_time,
            status: SessionStatus::error(self.status.counter, message),
        }
    }
}

/// Read-only view of a session record handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Unique id of this open session; changes on every reopen
    pub session_id: Uuid,
    #[serde(flatten)]
    pub key: SessionKey,
    pub engine: DatabaseType,
    pub status: SessionStatus,
    pub structure: Option<DatabaseStructure>,
    pub server_version: Option<ServerVersion>,
    pub analysed_time: Option<DateTime<Utc>>,
    pub disconnected: bool,
}

/// Last known state of a key after its session closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedSnapshot {
    pub structure: Option<DatabaseStructure>,
    pub analysed_time: Option<DateTime<Utc>>,
    /// Always an `error` status carrying the last message
    pub status: SessionStatus,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: SessionStatus,
    pub analysed_time: Option<DateTime<Utc>>,
    /// Whether a live session exists for the key
    pub live: bool,
}

/// Everything the registry knows about one key.
#[derive(Default)]
pub(crate) struct KeyState {
    pub(crate) live: Option<SessionRecord>,
    pub(crate) closed: Option<ClosedSnapshot>,
}

impl KeyState {
    pub(crate) fn live_session(&self, session_id: Uuid) -> Option<&SessionRecord> {
        self.live.as_ref().filter(|r| r.is_session(session_id))
    }

    pub(crate) fn live_session_mut(&mut self, session_id: Uuid) -> Option<&mut SessionRecord> {
        self.live.as_mut().filter(|r| r.is_session(session_id))
    }

    pub(crate) fn report(&self) -> StatusReport {
        if let Some(record) = &self.live {
            return StatusReport {
                status: record.status.clone(),
                analysed_time: record.analysed_time,
                live: true,
            };
        }
        match &self.closed {
            Some(snapshot) => StatusReport {
                status: snapshot.status.clone(),
                analysed_time: snapshot.analysed_time,
                live: false,
            },
            None => StatusReport {
                status: SessionStatus::not_connected(),
                analysed_time: None,
                live: false,
            },
        }
    }

    /// Runs the close transition for the live record, if any.
    ///
    /// Marks the record disconnected, replaces the closed snapshot and
    /// returns the record so the caller can notify and release the adapter
    /// after dropping the key lock.
    pub(crate) fn close_transition(&mut self) -> Option<SessionRecord> {
        let mut record = self.live.take()?;
        record.disconnected = true;
        self.closed = Some(record.snapshot());
        Some(record)
    }
}
