//! MySQL structure collection via `INFORMATION_SCHEMA`.
//!
//! Text columns are cast to CHAR to avoid VARBINARY decoding on MySQL 8.0+.

use crate::Result;
use crate::adapters::helpers::classify_sqlx_error;
use crate::models::{ColumnInfo, DatabaseStructure, DatabaseType, IndexInfo, TableInfo, ViewInfo};
use sqlx::{MySqlPool, Row};
use std::collections::BTreeMap;

/// Main entry point for structure collection.
pub(crate) async fn collect_structure(
    pool: &MySqlPool,
    database: &str,
) -> Result<DatabaseStructure> {
    let start_time = std::time::Instant::now();

    let table_names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR)
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = ?
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#,
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error("Failed to enumerate tables", e))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = collect_columns(pool, database, &name).await?;
        let indexes = collect_indexes(pool, database, &name).await?;
        tables.push(TableInfo {
            pure_name: name,
            schema_name: Some(database.to_string()),
            columns,
            indexes,
        });
    }

    let views = collect_views(pool, database).await?;

    tracing::debug!(
        "MySQL structure of '{}' collected in {:.2}s: {} tables, {} views",
        database,
        start_time.elapsed().as_secs_f64(),
        tables.len(),
        views.len()
    );

    Ok(DatabaseStructure {
        engine: DatabaseType::MySQL,
        tables,
        views,
        collections: Vec::new(),
    })
}

async fn collect_columns(pool: &MySqlPool, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
            CAST(COLUMN_TYPE AS CHAR) AS COLUMN_TYPE,
            CAST(IS_NULLABLE AS CHAR) AS IS_NULLABLE,
            CAST(COLUMN_DEFAULT AS CHAR) AS COLUMN_DEFAULT,
            ORDINAL_POSITION,
            CAST(COLUMN_COMMENT AS CHAR) AS COLUMN_COMMENT,
            CAST(EXTRA AS CHAR) AS EXTRA,
            CAST(COLUMN_KEY AS CHAR) AS COLUMN_KEY
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(format!("Failed to read columns of '{}'", table), e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row
            .try_get("COLUMN_NAME")
            .map_err(|e| classify_sqlx_error("Failed to parse column name", e))?;
        let is_nullable: String = row.try_get("IS_NULLABLE").unwrap_or_default();
        let extra: String = row.try_get("EXTRA").unwrap_or_default();
        let column_key: String = row.try_get("COLUMN_KEY").unwrap_or_default();
        let ordinal: u64 = row
            .try_get::<u64, _>("ORDINAL_POSITION")
            .or_else(|_| row.try_get::<i64, _>("ORDINAL_POSITION").map(|v| v.unsigned_abs()))
            .unwrap_or(0);

        columns.push(ColumnInfo {
            name,
            data_type: row.try_get("COLUMN_TYPE").unwrap_or_default(),
            is_nullable: is_nullable.eq_ignore_ascii_case("YES"),
            is_primary_key: column_key == "PRI",
            is_auto_increment: extra.to_lowercase().contains("auto_increment"),
            default_value: row.try_get("COLUMN_DEFAULT").ok().flatten(),
            comment: row
                .try_get::<Option<String>, _>("COLUMN_COMMENT")
                .ok()
                .flatten()
                .filter(|c| !c.is_empty()),
            ordinal_position: u32::try_from(ordinal).unwrap_or(u32::MAX),
        });
    }

    Ok(columns)
}

async fn collect_indexes(pool: &MySqlPool, database: &str, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(INDEX_NAME AS CHAR) AS INDEX_NAME,
            CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
            NON_UNIQUE
        FROM INFORMATION_SCHEMA.STATISTICS
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error(format!("Failed to read indexes of '{}'", table), e))?;

    // Rows arrive one per indexed column
    let mut by_name: BTreeMap<String, IndexInfo> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("INDEX_NAME").unwrap_or_default();
        let column: Option<String> = row.try_get("COLUMN_NAME").ok().flatten();
        let non_unique: i64 = row.try_get("NON_UNIQUE").unwrap_or(1);

        let index = by_name.entry(name.clone()).or_insert_with(|| IndexInfo {
            is_primary: name == "PRIMARY",
            name,
            columns: Vec::new(),
            is_unique: non_unique == 0,
        });
        if let Some(column) = column {
            index.columns.push(column);
        }
    }

    Ok(by_name.into_values().collect())
}

async fn collect_views(pool: &MySqlPool, database: &str) -> Result<Vec<ViewInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(TABLE_NAME AS CHAR) AS TABLE_NAME,
            CAST(VIEW_DEFINITION AS CHAR) AS VIEW_DEFINITION
        FROM INFORMATION_SCHEMA.VIEWS
        WHERE TABLE_SCHEMA = ?
        ORDER BY TABLE_NAME
        "#,
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(|e| classify_sqlx_error("Failed to enumerate views", e))?;

    rows.iter()
        .map(|row| {
            let pure_name: String = row
                .try_get("TABLE_NAME")
                .map_err(|e| classify_sqlx_error("Failed to parse view name", e))?;
            Ok(ViewInfo {
                pure_name,
                schema_name: Some(database.to_string()),
                definition: row.try_get("VIEW_DEFINITION").ok().flatten(),
            })
        })
        .collect()
}
