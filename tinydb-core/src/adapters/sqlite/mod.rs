//! SQLite driver sessions.
//!
//! # Module Structure
//! - `connection`: Opening the database file and pool options
//! - `structure`: Tables, columns, indexes and views via `sqlite_master`
//!
//! # SQLite-Specific Behavior
//! - A connection description names one database file; the database
//!   argument of a session is only used for keying and logging
//! - In-memory databases (`:memory:`) are pinned to a single connection
//! - Document filters are not supported for collection pages

mod connection;
mod structure;


use super::DatabaseAdapter;
use super::helpers::{classify_sqlx_error, encode_binary, quote_identifier, take_bounded};
use crate::Result;
use crate::models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Column, Executor, Row, SqlitePool, Statement};

/// SQLite session over a small connection pool.
pub struct SqliteAdapter {
    pool: SqlitePool,
    path: String,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("path", &self.path)
            .field("is_in_memory", &self.is_in_memory())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("SQLite ping failed", e))?;
        Ok(())
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("Failed to get SQLite version", e))?;

        Ok(ServerVersion {
            version_text: format!("SQLite {}", version),
            version,
        })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_database_list ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("Failed to list attached databases", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| classify_sqlx_error("Failed to parse database name", e))
            })
            .collect()
    }

    async fn execute_query(&self, statement: &str, max_rows: u32) -> Result<QueryResult> {
        let stream = sqlx::query(statement).fetch(&self.pool);
        let (rows, truncated) = take_bounded(stream, max_rows)
            .await
            .map_err(|e| classify_sqlx_error("SQLite query failed", e))?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            // No row to read names from, so ask the prepared statement.
            // DDL that already ran may not prepare again; it has no columns.
            None => match (&self.pool).prepare(statement).await {
                Ok(prepared) => prepared.columns().iter().map(|c| c.name().to_string()).collect(),
                Err(e) => {
                    tracing::debug!("No column metadata for SQLite statement: {}", e);
                    Vec::new()
                }
            },
        };

        Ok(QueryResult {
            columns,
            rows: rows.iter().map(row_to_json).collect(),
            truncated,
        })
    }

    async fn read_collection_page(
        &self,
        options: &CollectionPageOptions,
        max_rows: u32,
    ) -> Result<CollectionPage> {
        if options.filter.is_some() {
            return Err(crate::error::TinyDbError::unsupported_feature(
                "Document filters",
                "SQLite",
            ));
        }

        let table = quote_identifier(&options.pure_name, '"');
        let limit = options.limit.min(max_rows);
        let query = format!(
            "SELECT * FROM {}{} LIMIT ? OFFSET ?",
            table,
            order_by_clause(options)
        );

        let rows = sqlx::query(&query)
            .bind(i64::from(limit))
            .bind(i64::try_from(options.skip).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                classify_sqlx_error(format!("Failed to read table '{}'", options.pure_name), e)
            })?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                classify_sqlx_error(format!("Failed to count table '{}'", options.pure_name), e)
            })?;

        Ok(CollectionPage {
            rows: rows.iter().map(row_to_json).collect(),
            total: u64::try_from(total).ok(),
            truncated: options.limit > max_rows,
        })
    }

    async fn collect_structure(&self) -> Result<DatabaseStructure> {
        structure::collect_structure(&self.pool).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Builds the ORDER BY clause for a page request, empty when unsorted.
fn order_by_clause(options: &CollectionPageOptions) -> String {
    let fields = options.sort_fields();
    if fields.is_empty() {
        return String::new();
    }

    let terms: Vec<String> = fields
        .iter()
        .map(|(name, descending)| {
            format!(
                "{} {}",
                quote_identifier(name, '"'),
                if *descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

/// Converts a result row into a JSON object keyed by column name.
fn row_to_json(row: &sqlx::sqlite::SqliteRow) -> JsonValue {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        map.insert(
            column.name().to_string(),
            extract_column_value(row, column.ordinal()),
        );
    }
    JsonValue::Object(map)
}

/// Extracts a column value as JSON.
///
/// SQLite is dynamically typed, so the storage classes are tried in order.
fn extract_column_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| encode_binary(&bytes))
            .unwrap_or(JsonValue::Null);
    }

    JsonValue::Null
}
