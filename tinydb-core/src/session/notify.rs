//! Change notifications for session observers.
//!
//! Delivery is fire-and-forget: events are dropped when nobody listens, and
//! slow subscribers lag behind on the broadcast channel instead of blocking
//! the registry.

use super::record::SessionKey;
use serde::Serialize;
use tokio::sync::broadcast;

/// What changed for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Status,
    Structure,
    ServerVersion,
}

/// Change notification for one key.
///
/// # Example
/// ```rust
/// use tinydb_core::session::{ChangeEvent, ChangeKind, SessionKey};
///
/// let event = ChangeEvent::new(ChangeKind::Status, SessionKey::new("c1", "app"));
/// assert_eq!(event.topic(), "database-status-changed-c1-app");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: SessionKey,
}

impl ChangeEvent {
    /// Creates an event
    pub fn new(kind: ChangeKind, key: SessionKey) -> Self {
        Self { kind, key }
    }

    /// Topic name observers subscribe to.
    pub fn topic(&self) -> String {
        let name = match self.kind {
            ChangeKind::Status => "status",
            ChangeKind::Structure => "structure",
            ChangeKind::ServerVersion => "server-version",
        };
        format!(
            "database-{}-changed-{}-{}",
            name, self.key.connection_id, self.key.database
        )
    }
}

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub(crate) struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, kind: ChangeKind, key: &SessionKey) {
        let event = ChangeEvent::new(kind, key.clone());
        tracing::trace!("Emitting {}", event.topic());
        // No receivers is not an error
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let key = SessionKey::new("c1", "app");
        assert_eq!(
            ChangeEvent::new(ChangeKind::Structure, key.clone()).topic(),
            "database-structure-changed-c1-app"
        );
        assert_eq!(
            ChangeEvent::new(ChangeKind::ServerVersion, key).topic(),
            "database-server-version-changed-c1-app"
        );
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let notifier = ChangeNotifier::new(4);
        notifier.emit(ChangeKind::Status, &SessionKey::new("c1", "app"));

        let mut rx = notifier.subscribe();
        notifier.emit(ChangeKind::Structure, &SessionKey::new("c1", "app"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Structure);
    }
}
