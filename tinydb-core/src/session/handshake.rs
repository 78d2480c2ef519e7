//! Connect/analyze handshake.
//!
//! Two tasks cooperate for every open:
//! - the producer opens the driver session, fetches the server version and
//!   runs the analyzer, streaming [`HandshakeMessage`]s over a bounded
//!   channel;
//! - the dispatcher owns the key's lock, applies each message to the record
//!   and finally installs the opened adapter.
//!
//! The dispatcher always runs to completion even when the caller that
//! started the open goes away, so a record is never stranded in `pending`.

use super::notify::{ChangeKind, ChangeNotifier};
use super::record::{KeyState, SessionInfo, SessionRecord};
use super::run_bounded;
use super::status::{SessionStatus, StatusClock, StatusName};
use crate::Result;
use crate::adapters::{DatabaseAdapter, Driver};
use crate::analyzer::{AnalysisOutcome, SchemaAnalyzer};
use crate::config::{ConnectionDescription, SessionConfig};
use crate::error::TinyDbError;
use crate::models::{DatabaseStructure, ServerVersion};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Messages buffered between producer and dispatcher
const CHANNEL_CAPACITY: usize = 16;

/// One unit of handshake progress.
#[derive(Debug)]
pub(crate) enum HandshakeMessage {
    Status(SessionStatus),
    Version(ServerVersion),
    Structure(DatabaseStructure),
    StructureTime(DateTime<Utc>),
    /// The link failed after the session was opened
    Failed(TinyDbError),
}

/// Inputs of one handshake.
pub(crate) struct HandshakeContext {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) analyzer: Arc<dyn SchemaAnalyzer>,
    pub(crate) description: Arc<ConnectionDescription>,
    pub(crate) database: String,
    pub(crate) previous: Option<DatabaseStructure>,
    pub(crate) clock: Arc<StatusClock>,
    pub(crate) config: SessionConfig,
    pub(crate) cancel: CancellationToken,
}

type ProducerHandle = JoinHandle<Option<Arc<dyn DatabaseAdapter>>>;

/// Starts the producer task.
pub(crate) fn spawn_producer(context: HandshakeContext) -> (mpsc::Receiver<HandshakeMessage>, ProducerHandle) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(produce(context, tx));
    (rx, handle)
}

async fn send(tx: &mpsc::Sender<HandshakeMessage>, message: HandshakeMessage) {
    if tx.send(message).await.is_err() {
        tracing::debug!("Handshake dispatcher is gone, dropping message");
    }
}

/// Whether a failure after open means the link is gone.
///
/// Timeouts and cancellation during the handshake are recorded as an error
/// status instead; the opened session may still serve requests.
fn link_lost(error: &TinyDbError) -> bool {
    matches!(error, TinyDbError::Transport { .. })
}

async fn produce(
    context: HandshakeContext,
    tx: mpsc::Sender<HandshakeMessage>,
) -> Option<Arc<dyn DatabaseAdapter>> {
    let HandshakeContext {
        driver,
        analyzer,
        description,
        database,
        previous,
        clock,
        config,
        cancel,
    } = context;

    send(&tx, HandshakeMessage::Status(SessionStatus::pending(clock.tick(), "Connecting"))).await;

    let opened = run_bounded(
        "Connect",
        config.connect_timeout,
        &cancel,
        driver.open(&description, &database),
    )
    .await;

    let adapter = match opened {
        Ok(adapter) => adapter,
        Err(e) => {
            tracing::warn!(
                connection_id = %description.id,
                database = %database,
                "Failed to open session: {}",
                e
            );
            send(&tx, HandshakeMessage::Status(SessionStatus::error(clock.tick(), e.to_string()))).await;
            return None;
        }
    };

    match run_bounded(
        "Server version",
        config.connect_timeout,
        &cancel,
        adapter.server_version(),
    )
    .await
    {
        Ok(version) => send(&tx, HandshakeMessage::Version(version)).await,
        Err(e) if link_lost(&e) => {
            send(&tx, HandshakeMessage::Failed(e)).await;
            return Some(adapter);
        }
        Err(e) => tracing::warn!(
            connection_id = %description.id,
            database = %database,
            "Server version unavailable: {}",
            e
        ),
    }

    let analysis = run_bounded(
        "Structure analysis",
        config.analysis_timeout,
        &cancel,
        analyzer.analyze(adapter.as_ref(), &database, previous.as_ref()),
    )
    .await;

    match analysis {
        Ok(AnalysisOutcome::Changed(structure)) => {
            send(&tx, HandshakeMessage::Structure(structure)).await;
        }
        Ok(AnalysisOutcome::Unchanged) => {
            tracing::debug!(
                connection_id = %description.id,
                database = %database,
                "Structure unchanged since last close"
            );
        }
        Err(e) if link_lost(&e) => {
            send(&tx, HandshakeMessage::Failed(e)).await;
            return Some(adapter);
        }
        Err(e) => {
            let message = format!("Structure analysis failed: {}", e);
            send(&tx, HandshakeMessage::Status(SessionStatus::error(clock.tick(), message))).await;
            return Some(adapter);
        }
    }

    send(&tx, HandshakeMessage::StructureTime(Utc::now())).await;
    send(&tx, HandshakeMessage::Status(SessionStatus::ok(clock.tick()))).await;
    Some(adapter)
}

/// Applies one message to the record `session_id`.
///
/// Returns the record when the message closed it.
fn apply_message(
    state: &mut KeyState,
    session_id: Uuid,
    message: HandshakeMessage,
    clock: &StatusClock,
    notifier: &ChangeNotifier,
) -> Option<SessionRecord> {
    let Some(record) = state.live_session_mut(session_id) else {
        tracing::debug!("Dropping handshake message for closed session {}", session_id);
        return None;
    };

    match message {
        HandshakeMessage::Status(status) => {
            if record.status.apply(status) {
                notifier.emit(ChangeKind::Status, &record.key);
            }
        }
        HandshakeMessage::Version(version) => {
            record.server_version = Some(version);
            notifier.emit(ChangeKind::ServerVersion, &record.key);
        }
        HandshakeMessage::Structure(structure) => {
            record.structure = Some(structure);
            notifier.emit(ChangeKind::Structure, &record.key);
        }
        HandshakeMessage::StructureTime(time) => {
            record.analysed_time = Some(time);
        }
        HandshakeMessage::Failed(error) => {
            tracing::warn!(
                session_id = %session_id,
                "Session {} lost its link during handshake: {}",
                record.key,
                error
            );
            record
                .status
                .apply(SessionStatus::error(clock.tick(), error.to_string()));
            let closed = state.close_transition();
            if let Some(closed) = &closed {
                notifier.emit(ChangeKind::Status, &closed.key);
            }
            return closed;
        }
    }
    None
}

/// Drains the producer's messages into the record and installs the adapter.
///
/// Holds the key's lock for the whole handshake.
pub(crate) async fn dispatch(
    mut state: OwnedMutexGuard<KeyState>,
    session_id: Uuid,
    mut rx: mpsc::Receiver<HandshakeMessage>,
    producer: ProducerHandle,
    clock: Arc<StatusClock>,
    notifier: ChangeNotifier,
) -> Result<SessionInfo> {
    let mut closed: Option<SessionRecord> = None;

    while let Some(message) = rx.recv().await {
        if let Some(record) = apply_message(&mut state, session_id, message, &clock, &notifier) {
            closed = Some(record);
        }
    }

    let mut orphan: Option<Arc<dyn DatabaseAdapter>> = None;
    match producer.await {
        Ok(Some(adapter)) => match state.live_session_mut(session_id) {
            Some(record) => record.adapter = Some(adapter),
            None => orphan = Some(adapter),
        },
        Ok(None) => {}
        Err(e) => {
            tracing::error!(session_id = %session_id, "Handshake producer failed: {}", e);
            if let Some(record) = state.live_session_mut(session_id) {
                let failure = SessionStatus::error(clock.tick(), format!("Handshake task failed: {}", e));
                if record.status.apply(failure) {
                    notifier.emit(ChangeKind::Status, &record.key);
                }
            }
        }
    }

    // The producer always ends with a terminal status, but a record must
    // never stay pending if it did not.
    if let Some(record) = state.live_session_mut(session_id)
        && record.status.name == StatusName::Pending
    {
        let failure = SessionStatus::error(clock.tick(), "Handshake ended without a result");
        if record.status.apply(failure) {
            notifier.emit(ChangeKind::Status, &record.key);
        }
    }

    let info = match (state.live_session(session_id), &closed) {
        (Some(record), _) => Some(record.info()),
        (None, Some(record)) => Some(record.info()),
        (None, None) => None,
    };
    drop(state);

    if let Some(adapter) = orphan {
        adapter.close().await;
    }

    match &info {
        Some(info) => tracing::info!(
            session_id = %session_id,
            counter = info.status.counter,
            "Handshake for {} finished with status {}",
            info.key,
            info.status.name
        ),
        None => tracing::warn!(session_id = %session_id, "Session closed during handshake"),
    }

    info.ok_or_else(|| TinyDbError::handshake(format!("Session {} closed during handshake", session_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionDescription;
    use crate::models::DatabaseType;
    use crate::session::record::SessionKey;

    fn state_with_pending(clock: &StatusClock) -> (KeyState, Uuid) {
        let record = SessionRecord::pending(
            SessionKey::new("c1", "app"),
            Arc::new(ConnectionDescription::new("c1", DatabaseType::SQLite).with_file(":memory:")),
            SessionStatus::pending(clock.tick(), "Connecting"),
            None,
            CancellationToken::new(),
        );
        let id = record.session_id;
        (
            KeyState {
                live: Some(record),
                closed: None,
            },
            id,
        )
    }

    #[test]
    fn test_stale_status_message_is_ignored() {
        let clock = StatusClock::new();
        let notifier = ChangeNotifier::new(8);
        let (mut state, id) = state_with_pending(&clock);

        let newer = SessionStatus::ok(clock.tick());
        apply_message(&mut state, id, HandshakeMessage::Status(newer.clone()), &clock, &notifier);
        apply_message(
            &mut state,
            id,
            HandshakeMessage::Status(SessionStatus::error(1, "late")),
            &clock,
            &notifier,
        );

        assert_eq!(state.live.as_ref().unwrap().status, newer);
    }

    #[test]
    fn test_failed_message_closes_record() {
        let clock = StatusClock::new();
        let notifier = ChangeNotifier::new(8);
        let (mut state, id) = state_with_pending(&clock);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let closed = apply_message(
            &mut state,
            id,
            HandshakeMessage::Failed(TinyDbError::transport_failed("Analysis", reset)),
            &clock,
            &notifier,
        );

        assert!(closed.unwrap().disconnected);
        assert!(state.live.is_none());
        let snapshot = state.closed.unwrap();
        assert!(snapshot.status.is_error());
        assert!(snapshot.status.message.unwrap().contains("Analysis"));
    }

    #[test]
    fn test_messages_for_other_sessions_are_dropped() {
        let clock = StatusClock::new();
        let notifier = ChangeNotifier::new(8);
        let (mut state, _) = state_with_pending(&clock);

        apply_message(
            &mut state,
            Uuid::new_v4(),
            HandshakeMessage::Structure(DatabaseStructure::empty(DatabaseType::SQLite)),
            &clock,
            &notifier,
        );
        assert!(state.live.as_ref().unwrap().structure.is_none());
    }

    #[test]
    fn test_link_lost_only_for_transport() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(link_lost(&TinyDbError::transport_failed("ping", reset)));
        assert!(!link_lost(&TinyDbError::timeout("Structure analysis", std::time::Duration::from_secs(1))));
        assert!(!link_lost(&TinyDbError::query_failed("bad statement")));
    }
}
