//! SQLite structure collection.
//!
//! # SQLite System Tables
//! - `sqlite_master`: Schema definitions for all database objects
//! - `pragma_table_info()`: Column information for a table
//! - `pragma_index_list()` / `pragma_index_info()`: Indexes and their columns

use crate::Result;
use crate::adapters::helpers::classify_sqlx_error;
use crate::models::{ColumnInfo, DatabaseStructure, DatabaseType, IndexInfo, TableInfo, ViewInfo};
use sqlx::{Row, SqlitePool};

/// Main entry point for structure collection.
pub(crate) async fn collect_structure(pool: &SqlitePool) -> Result<DatabaseStructure> {
    let start_time = std::time::Instant::now();

    let table_rows = sqlx::query(
        r#"
        SELECT name
        FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error("Failed to enumerate tables", e))?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in &table_rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| classify_sqlx_error("Failed to parse table name", e))?;

        let columns = collect_columns(pool, &name).await?;
        let indexes = collect_indexes(pool, &name).await?;

        tables.push(TableInfo {
            pure_name: name,
            schema_name: None,
            columns,
            indexes,
        });
    }

    let views = collect_views(pool).await?;

    tracing::debug!(
        "SQLite structure collected in {:.2}s: {} tables, {} views",
        start_time.elapsed().as_secs_f64(),
        tables.len(),
        views.len()
    );

    Ok(DatabaseStructure {
        engine: DatabaseType::SQLite,
        tables,
        views,
        collections: Vec::new(),
    })
}

async fn collect_columns(pool: &SqlitePool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT cid, name, type, "notnull" AS not_null, dflt_value, pk
        FROM pragma_table_info(?)
        ORDER BY cid
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(format!("Failed to read columns of '{}'", table), e))?;

    let pk_count = rows
        .iter()
        .filter(|row| row.try_get::<i64, _>("pk").unwrap_or(0) > 0)
        .count();

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let cid: i64 = row.try_get("cid").unwrap_or(0);
        let name: String = row
            .try_get("name")
            .map_err(|e| classify_sqlx_error("Failed to parse column name", e))?;
        let data_type: String = row.try_get("type").unwrap_or_default();
        let not_null: i64 = row.try_get("not_null").unwrap_or(0);
        let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
        let is_primary_key = row.try_get::<i64, _>("pk").unwrap_or(0) > 0;

        // A lone INTEGER PRIMARY KEY aliases the rowid
        let is_auto_increment =
            is_primary_key && pk_count == 1 && data_type.eq_ignore_ascii_case("INTEGER");

        columns.push(ColumnInfo {
            name,
            data_type,
            is_nullable: not_null == 0 && !is_primary_key,
            is_primary_key,
            is_auto_increment,
            default_value,
            comment: None,
            ordinal_position: u32::try_from(cid.saturating_add(1)).unwrap_or(0),
        });
    }

    Ok(columns)
}

async fn collect_indexes(pool: &SqlitePool, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(r#"SELECT name, "unique" AS is_unique, origin FROM pragma_index_list(?)"#)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| classify_sqlx_error(format!("Failed to read indexes of '{}'", table), e))?;

    let mut indexes = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| classify_sqlx_error("Failed to parse index name", e))?;
        let is_unique = row.try_get::<i64, _>("is_unique").unwrap_or(0) != 0;
        let origin: String = row.try_get("origin").unwrap_or_default();

        let column_rows =
            sqlx::query("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                .bind(&name)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    classify_sqlx_error(format!("Failed to read columns of index '{}'", name), e)
                })?;

        let columns = column_rows
            .iter()
            .filter_map(|r| r.try_get::<Option<String>, _>("name").ok().flatten())
            .collect();

        indexes.push(IndexInfo {
            name,
            columns,
            is_unique,
            is_primary: origin == "pk",
        });
    }

    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}

async fn collect_views(pool: &SqlitePool) -> Result<Vec<ViewInfo>> {
    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error("Failed to enumerate views", e))?;

    rows.iter()
        .map(|row| {
            let pure_name: String = row
                .try_get("name")
                .map_err(|e| classify_sqlx_error("Failed to parse view name", e))?;
            Ok(ViewInfo {
                pure_name,
                schema_name: None,
                definition: row.try_get("sql").ok().flatten(),
            })
        })
        .collect()
}
