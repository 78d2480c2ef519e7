//! MongoDB driver sessions.
//!
//! # Module Structure
//! - `connection`: Client options and connection URL assembly
//! - `structure`: Collections, indexes and document counts
//!
//! Statements are JSON command documents (for example
//! `{"find": "users", "filter": {"active": true}}`) run against the bound
//! database. Cursor replies are flattened into rows.

mod connection;
mod structure;

#[cfg(test)]
mod tests;

pub use connection::{DEFAULT_PORT, connection_url};

use super::DatabaseAdapter;
use super::helpers::take_bounded;
use crate::Result;
use crate::error::TinyDbError;
use crate::models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion,
};
use async_trait::async_trait;
use mongodb::Client;
use mongodb::bson::{Bson, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::FindOptions;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};

/// Database used for server-level commands
const ADMIN_DATABASE: &str = "admin";

/// MongoDB session bound to one database.
pub struct MongoAdapter {
    client: Client,
    database: Option<String>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MongoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoAdapter")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            // Note: client options carry credentials and are omitted
            .finish_non_exhaustive()
    }
}

impl MongoAdapter {
    fn client(&self) -> Result<&Client> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TinyDbError::transport_failed(
                "MongoDB session",
                std::io::Error::new(std::io::ErrorKind::NotConnected, "session is closed"),
            ));
        }
        Ok(&self.client)
    }

    fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(ADMIN_DATABASE)
    }
}

/// Maps a driver error onto the session error taxonomy.
///
/// Server-side command failures and malformed documents leave the link
/// usable; everything else is treated as a transport failure.
pub(crate) fn classify_mongo_error(context: impl Into<String>, error: mongodb::error::Error) -> TinyDbError {
    let context = context.into();
    let statement_level = matches!(
        error.kind.as_ref(),
        ErrorKind::Command(_)
            | ErrorKind::Write(_)
            | ErrorKind::InvalidArgument { .. }
            | ErrorKind::BsonDeserialization(_)
            | ErrorKind::BsonSerialization(_)
    );

    if statement_level {
        TinyDbError::query_failed(format!("{}: {}", context, error))
    } else {
        TinyDbError::transport_failed(context, error)
    }
}

/// Converts request JSON into a BSON document, honoring extended JSON.
pub(crate) fn json_to_document(value: &JsonValue, what: &str) -> Result<Document> {
    match Bson::try_from(value.clone()) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(TinyDbError::query_failed(format!(
            "{} must be a JSON object",
            what
        ))),
        Err(e) => Err(TinyDbError::query_failed(format!(
            "{} is not valid extended JSON: {}",
            what, e
        ))),
    }
}

/// Converts a BSON document into relaxed extended JSON.
pub(crate) fn document_to_json(document: Document) -> JsonValue {
    Bson::Document(document).into_relaxed_extjson()
}

/// Flattens a command reply into rows.
///
/// Cursor replies yield their first batch; other replies are one row.
/// Returns the rows, whether they were cut, and the open cursor to kill.
fn reply_rows(mut reply: Document, max_rows: u32) -> (Vec<Document>, bool, Option<(String, i64)>) {
    let limit = usize::try_from(max_rows).unwrap_or(usize::MAX);

    let mut cursor = match reply.remove("cursor") {
        Some(Bson::Document(cursor)) => cursor,
        Some(other) => {
            reply.insert("cursor", other);
            return (vec![reply], false, None);
        }
        None => return (vec![reply], false, None),
    };

    let cursor_id = cursor.get_i64("id").unwrap_or(0);
    let namespace = cursor.get_str("ns").unwrap_or_default().to_string();
    let batch = match cursor.remove("firstBatch") {
        Some(Bson::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut rows: Vec<Document> = batch
        .into_iter()
        .filter_map(|item| match item {
            Bson::Document(document) => Some(document),
            _ => None,
        })
        .collect();

    let mut truncated = cursor_id != 0;
    if rows.len() > limit {
        rows.truncate(limit);
        truncated = true;
    }

    let open_cursor = (cursor_id != 0).then_some((namespace, cursor_id));
    (rows, truncated, open_cursor)
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDB
    }

    async fn ping(&self) -> Result<()> {
        self.client()?
            .database(ADMIN_DATABASE)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| classify_mongo_error("MongoDB ping failed", e))?;
        Ok(())
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        let info = self
            .client()?
            .database(ADMIN_DATABASE)
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(|e| classify_mongo_error("Failed to get MongoDB version", e))?;

        let version = info.get_str("version").unwrap_or("unknown").to_string();
        Ok(ServerVersion {
            version_text: format!("MongoDB {}", version),
            version,
        })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.client()?
            .list_database_names()
            .await
            .map_err(|e| classify_mongo_error("Failed to list MongoDB databases", e))
    }

    async fn execute_query(&self, statement: &str, max_rows: u32) -> Result<QueryResult> {
        let command: JsonValue = serde_json::from_str(statement).map_err(|e| {
            TinyDbError::query_failed(format!("MongoDB statements must be JSON commands: {}", e))
        })?;
        let command = json_to_document(&command, "MongoDB command")?;

        let database = self.client()?.database(self.database_name());
        let reply = database
            .run_command(command)
            .await
            .map_err(|e| classify_mongo_error("MongoDB command failed", e))?;

        let (rows, truncated, open_cursor) = reply_rows(reply, max_rows);

        if let Some((namespace, cursor_id)) = open_cursor {
            let collection = namespace
                .split_once('.')
                .map(|(_, c)| c.to_string())
                .unwrap_or(namespace);
            if let Err(e) = database
                .run_command(doc! { "killCursors": collection, "cursors": [cursor_id] })
                .await
            {
                tracing::debug!("Failed to kill MongoDB cursor {}: {}", cursor_id, e);
            }
        }

        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Ok(QueryResult {
            columns,
            rows: rows.into_iter().map(document_to_json).collect(),
            truncated,
        })
    }

    async fn read_collection_page(
        &self,
        options: &CollectionPageOptions,
        max_rows: u32,
    ) -> Result<CollectionPage> {
        let filter = match &options.filter {
            Some(filter) => json_to_document(filter, "Filter")?,
            None => Document::new(),
        };

        let mut sort = Document::new();
        for (field, descending) in options.sort_fields() {
            sort.insert(field, if descending { -1 } else { 1 });
        }

        let limit = options.limit.min(max_rows);
        let mut find_options = FindOptions::default();
        find_options.skip = Some(options.skip);
        find_options.limit = Some(i64::from(limit));
        if !sort.is_empty() {
            find_options.sort = Some(sort);
        }

        let collection = self
            .client()?
            .database(self.database_name())
            .collection::<Document>(&options.pure_name);

        let cursor = collection
            .find(filter.clone())
            .with_options(find_options)
            .await
            .map_err(|e| {
                classify_mongo_error(format!("Failed to read collection '{}'", options.pure_name), e)
            })?;

        let (documents, _) = take_bounded(cursor, limit).await.map_err(|e| {
            classify_mongo_error(
                format!("Failed to iterate collection '{}'", options.pure_name),
                e,
            )
        })?;

        let total = collection.count_documents(filter).await.map_err(|e| {
            classify_mongo_error(format!("Failed to count collection '{}'", options.pure_name), e)
        })?;

        Ok(CollectionPage {
            rows: documents.into_iter().map(document_to_json).collect(),
            total: Some(total),
            truncated: options.limit > max_rows,
        })
    }

    async fn collect_structure(&self) -> Result<DatabaseStructure> {
        match &self.database {
            Some(database) => structure::collect_structure(self.client()?, database).await,
            None => Ok(DatabaseStructure::empty(DatabaseType::MongoDB)),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.client.clone().shutdown().await;
    }

    async fn terminate(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Do not wait for checked-out connections to come back
        self.client.clone().shutdown().immediate(true).await;
    }
}
