//! Session status state machine.
//!
//! A status is `pending` when a record is created, `ok` after a successful
//! handshake or ping, and `error` after any failure. Every status carries a
//! counter drawn from a registry-wide [`StatusClock`]; an update is applied
//! only when its counter is newer than the stored one, so a late message
//! from an overlapping producer cannot overwrite a newer state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Health of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusName {
    Pending,
    Ok,
    Error,
}

impl std::fmt::Display for StatusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusName::Pending => write!(f, "pending"),
            StatusName::Ok => write!(f, "ok"),
            StatusName::Error => write!(f, "error"),
        }
    }
}

/// Status of one session record.
///
/// # Example
/// ```rust
/// use tinydb_core::session::{SessionStatus, StatusName};
///
/// let mut status = SessionStatus::pending(5, "connecting");
/// assert!(!status.apply(SessionStatus::ok(4)));
/// assert_eq!(status.name, StatusName::Pending);
///
/// assert!(status.apply(SessionStatus::ok(6)));
/// assert_eq!(status.name, StatusName::Ok);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub name: StatusName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub counter: u64,
}

impl SessionStatus {
    /// Pending status with a progress message
    pub fn pending(counter: u64, message: impl Into<String>) -> Self {
        Self {
            name: StatusName::Pending,
            message: Some(message.into()),
            counter,
        }
    }

    /// Healthy status
    pub fn ok(counter: u64) -> Self {
        Self {
            name: StatusName::Ok,
            message: None,
            counter,
        }
    }

    /// Failed status carrying the failure description
    pub fn error(counter: u64, message: impl Into<String>) -> Self {
        Self {
            name: StatusName::Error,
            message: Some(message.into()),
            counter,
        }
    }

    /// Status reported for keys that were never opened.
    pub fn not_connected() -> Self {
        Self::error(0, "Not connected")
    }

    /// Checks if the status is `ok`
    pub fn is_ok(&self) -> bool {
        self.name == StatusName::Ok
    }

    /// Checks if the status is `error`
    pub fn is_error(&self) -> bool {
        self.name == StatusName::Error
    }

    /// Checks if `update` is newer than this status.
    pub fn is_superseded_by(&self, update: &SessionStatus) -> bool {
        update.counter > self.counter
    }

    /// Applies `update` when it is newer; returns whether it was applied.
    pub fn apply(&mut self, update: SessionStatus) -> bool {
        if !self.is_superseded_by(&update) {
            tracing::trace!(
                "Discarding stale status {} (counter {} <= {})",
                update.name,
                update.counter,
                self.counter
            );
            return false;
        }
        *self = update;
        true
    }
}

/// Registry-wide source of status counters.
///
/// Counters are strictly increasing across all records, which makes them
/// strictly increasing per record as well.
#[derive(Debug, Default)]
pub struct StatusClock {
    last: AtomicU64,
}

impl StatusClock {
    /// Creates a clock whose first tick is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next counter value.
    pub fn tick(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Last value handed out (0 before the first tick)
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}
