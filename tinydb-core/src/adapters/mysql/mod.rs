//! MySQL and MariaDB driver sessions.
//!
//! # Module Structure
//! - `connection`: Connect options built from a connection description
//! - `structure`: Tables, columns, indexes and views via `INFORMATION_SCHEMA`
//!
//! Each session is bound to one database: the requested database, else the
//! description's default database, else none (server-level session).

mod connection;
mod structure;


pub use connection::{DEFAULT_PORT, parse_version};

use super::DatabaseAdapter;
use super::helpers::{classify_sqlx_error, encode_binary, quote_identifier, take_bounded};
use crate::Result;
use crate::models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Column, Executor, MySqlPool, Row, Statement};

/// MySQL session over a connection pool bound to one database.
pub struct MySqlAdapter {
    pool: MySqlPool,
    database: Option<String>,
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAdapter")
            .field("database", &self.database)
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl MySqlAdapter {
    /// Resolves the database this session works on.
    async fn current_database(&self) -> Result<Option<String>> {
        if let Some(database) = &self.database {
            return Ok(Some(database.clone()));
        }

        sqlx::query_scalar::<_, Option<String>>("SELECT CAST(DATABASE() AS CHAR)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("Failed to resolve current database", e))
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("MySQL ping failed", e))?;
        Ok(())
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        let version: String = sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("Failed to get MySQL version", e))?;

        Ok(parse_version(&version))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error("Failed to list MySQL databases", e))
    }

    async fn execute_query(&self, statement: &str, max_rows: u32) -> Result<QueryResult> {
        let stream = sqlx::query(statement).fetch(&self.pool);
        let (rows, truncated) = take_bounded(stream, max_rows)
            .await
            .map_err(|e| classify_sqlx_error("MySQL query failed", e))?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            // No row to read names from, so ask the prepared statement.
            // DDL that already ran may not prepare again; it has no columns.
            None => match (&self.pool).prepare(statement).await {
                Ok(prepared) => prepared.columns().iter().map(|c| c.name().to_string()).collect(),
                Err(e) => {
                    tracing::debug!("No column metadata for MySQL statement: {}", e);
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
                "MySQL",
            ));
        }

        let table = quote_identifier(&options.pure_name, '`');
        let limit = options.limit.min(max_rows);
        let order_by: Vec<String> = options
            .sort_fields()
            .iter()
            .map(|(name, descending)| {
                format!(
                    "{} {}",
                    quote_identifier(name, '`'),
                    if *descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        let order_clause = if order_by.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", order_by.join(", "))
        };

        let query = format!("SELECT * FROM {}{} LIMIT ? OFFSET ?", table, order_clause);
        let rows = sqlx::query(&query)
            .bind(u64::from(limit))
            .bind(options.skip)
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
        match self.current_database().await? {
            Some(database) => structure::collect_structure(&self.pool, &database).await,
            None => {
                tracing::debug!("MySQL session has no database selected, structure is empty");
                Ok(DatabaseStructure::empty(DatabaseType::MySQL))
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Converts a result row into a JSON object keyed by column name.
fn row_to_json(row: &sqlx::mysql::MySqlRow) -> JsonValue {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        map.insert(
            column.name().to_string(),
            extract_column_value(row, column.ordinal()),
        );
    }
    JsonValue::Object(map)
}

/// Extracts a column value as JSON, trying the common wire types in turn.
fn extract_column_value(row: &sqlx::mysql::MySqlRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
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
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return v
            .map(|t| JsonValue::String(t.to_string()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return v
            .map(|d| JsonValue::String(d.to_string()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(text) => JsonValue::String(text),
                Err(e) => encode_binary(e.as_bytes()),
            })
            .unwrap_or(JsonValue::Null);
    }

    JsonValue::Null
}
