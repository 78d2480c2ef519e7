//! Request routing against open sessions.
//!
//! Requests run directly against the session's adapter, one at a time per
//! session, without holding the key's lock. A transport failure closes the
//! session before the error is returned, so the next call for the key runs
//! a fresh handshake. Nothing is retried here.

use super::SessionRegistry;
use super::notify::ChangeKind;
use super::record::SessionInfo;
use super::registry::release;
use super::run_bounded;
use super::status::SessionStatus;
use crate::Result;
use crate::adapters::DatabaseAdapter;
use crate::error::TinyDbError;
use crate::models::{CollectionPage, CollectionPageOptions, QueryResult};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// A request against an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    /// Run one statement and return its rows
    ExecuteQuery { statement: String },
    /// Read one page of a table or collection
    ReadCollectionPage(CollectionPageOptions),
    /// List databases visible to the session
    ListDatabases,
}

impl SessionRequest {
    /// Rejects malformed requests before any session is touched.
    ///
    /// # Errors
    /// Returns [`TinyDbError::Validation`] naming the problem
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ExecuteQuery { statement } if statement.trim().is_empty() => {
                Err(TinyDbError::validation("statement cannot be empty"))
            }
            Self::ExecuteQuery { .. } | Self::ListDatabases => Ok(()),
            Self::ReadCollectionPage(options) => options.validate(),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::ExecuteQuery { .. } => "Query",
            Self::ReadCollectionPage(_) => "Collection page",
            Self::ListDatabases => "List databases",
        }
    }
}

/// Response to a [`SessionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SessionResponse {
    Rows(QueryResult),
    Page(CollectionPage),
    Databases(Vec<String>),
}

impl SessionRegistry {
    /// Routes a request to the session described by `session`.
    ///
    /// # Errors
    /// - [`TinyDbError::Validation`] for malformed requests
    /// - [`TinyDbError::Handshake`] when the session is closed or never
    ///   finished opening
    /// - the driver's error otherwise; transport failures close the session
    pub async fn route(&self, session: &SessionInfo, request: SessionRequest) -> Result<SessionResponse> {
        request.validate()?;
        let operation = request.operation();

        self.with_session(session, operation, move |adapter, max_rows| async move {
            match request {
                SessionRequest::ExecuteQuery { statement } => adapter
                    .execute_query(&statement, max_rows)
                    .await
                    .map(SessionResponse::Rows),
                SessionRequest::ReadCollectionPage(options) => adapter
                    .read_collection_page(&options, max_rows)
                    .await
                    .map(SessionResponse::Page),
                SessionRequest::ListDatabases => adapter
                    .list_databases()
                    .await
                    .map(SessionResponse::Databases),
            }
        })
        .await
    }

    /// Opens the key if needed and runs one statement.
    ///
    /// # Errors
    /// See [`SessionRegistry::ensure_open`] and [`SessionRegistry::route`]
    pub async fn execute_query(
        &self,
        connection_id: &str,
        database: &str,
        statement: &str,
    ) -> Result<QueryResult> {
        if statement.trim().is_empty() {
            return Err(TinyDbError::validation("statement cannot be empty"));
        }
        let session = self.ensure_open(connection_id, database).await?;
        let statement = statement.to_string();

        self.with_session(&session, "Query", move |adapter, max_rows| async move {
            adapter.execute_query(&statement, max_rows).await
        })
        .await
    }

    /// Opens the key if needed and reads one page.
    ///
    /// # Errors
    /// See [`SessionRegistry::ensure_open`] and [`SessionRegistry::route`]
    pub async fn collection_page(
        &self,
        connection_id: &str,
        database: &str,
        options: CollectionPageOptions,
    ) -> Result<CollectionPage> {
        options.validate()?;
        let session = self.ensure_open(connection_id, database).await?;

        self.with_session(&session, "Collection page", move |adapter, max_rows| async move {
            adapter.read_collection_page(&options, max_rows).await
        })
        .await
    }

    /// Opens the key if needed and lists the server's databases.
    ///
    /// # Errors
    /// See [`SessionRegistry::ensure_open`] and [`SessionRegistry::route`]
    pub async fn list_databases(&self, connection_id: &str, database: &str) -> Result<Vec<String>> {
        let session = self.ensure_open(connection_id, database).await?;

        self.with_session(&session, "List databases", |adapter, _| async move {
            adapter.list_databases().await
        })
        .await
    }

    async fn with_session<T, F, Fut>(&self, session: &SessionInfo, operation: &str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn DatabaseAdapter>, u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = &session.key;
        let slot = self
            .existing_slot(key)
            .ok_or_else(|| TinyDbError::handshake(format!("Session {} was never opened", key)))?;

        let (adapter, gate, cancel) = {
            let state = slot.lock().await;
            let record = state.live_session(session.session_id).ok_or_else(|| {
                TinyDbError::handshake(format!("Session {} is closed", key))
            })?;
            let adapter = record.adapter.clone().ok_or_else(|| {
                TinyDbError::handshake(format!(
                    "Session {} is not open: {}",
                    key,
                    record.status.message.as_deref().unwrap_or("handshake failed")
                ))
            })?;
            (adapter, Arc::clone(&record.query_gate), record.cancel.clone())
        };

        let outcome = {
            let _turn = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TinyDbError::cancelled(operation)),
                turn = gate.lock() => turn,
            };
            tracing::debug!(session_id = %session.session_id, "{} on {}", operation, key);
            run_bounded(
                operation,
                self.config.query_timeout,
                &cancel,
                call(adapter, self.config.max_rows),
            )
            .await
        };

        let error = match outcome {
            Err(e) if e.is_transport() => e,
            other => return other,
        };

        tracing::warn!(
            session_id = %session.session_id,
            "{} on {} failed, closing session: {}",
            operation,
            key,
            error
        );
        let closed = {
            let mut state = slot.lock().await;
            match state.live_session_mut(session.session_id) {
                Some(record) => {
                    let failure = SessionStatus::error(self.clock.tick(), error.to_string());
                    if record.status.apply(failure) {
                        self.notifier.emit(ChangeKind::Status, key);
                    }
                    state.close_transition()
                }
                None => None,
            }
        };
        if let Some(record) = closed {
            release(&self.notifier, record, false).await;
        }

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation() {
        let empty = SessionRequest::ExecuteQuery {
            statement: "   ".to_string(),
        };
        assert!(matches!(empty.validate(), Err(TinyDbError::Validation { .. })));

        let page = SessionRequest::ReadCollectionPage(CollectionPageOptions::new(""));
        assert!(page.validate().is_err());

        assert!(SessionRequest::ListDatabases.validate().is_ok());
    }

    #[test]
    fn test_response_serializes_untagged() {
        let response = SessionResponse::Databases(vec!["main".to_string()]);
        assert_eq!(serde_json::to_value(response).unwrap(), json!(["main"]));
    }
}
