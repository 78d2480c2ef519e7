//! Engine-agnostic data models shared by drivers, analyzers and sessions.
//!
//! The structure document produced by analysis describes tables (relational
//! engines) and collections (document engines) with their columns and
//! indexes. All models are serializable so they can be handed to a frontend
//! unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    MySQL,
    #[serde(alias = "mongo")]
    MongoDB,
    SQLite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::MySQL => write!(f, "MySQL"),
            DatabaseType::MongoDB => write!(f, "MongoDB"),
            DatabaseType::SQLite => write!(f, "SQLite"),
        }
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::TinyDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "mongo" | "mongodb" => Ok(Self::MongoDB),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            other => Err(crate::error::TinyDbError::configuration(format!(
                "Unknown database engine '{}'",
                other
            ))),
        }
    }
}

/// Server version reported by a driver session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
    /// Raw version string as returned by the server
    pub version: String,
    /// Human readable version, e.g. `MariaDB 10.11.4`
    pub version_text: String,
}

/// Column of a relational table, or an observed field of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    pub ordinal_position: u32,
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// Relational table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub pure_name: String,
    pub schema_name: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

/// Relational view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    pub pure_name: String,
    pub schema_name: Option<String>,
    pub definition: Option<String>,
}

/// Document collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub pure_name: String,
    pub indexes: Vec<IndexInfo>,
    pub document_count: Option<u64>,
}

/// Engine-agnostic schema document for one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStructure {
    pub engine: DatabaseType,
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub collections: Vec<CollectionInfo>,
}

impl DatabaseStructure {
    /// Creates an empty structure for the given engine
    pub fn empty(engine: DatabaseType) -> Self {
        Self {
            engine,
            tables: Vec::new(),
            views: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Gets the total number of database objects
    pub fn object_count(&self) -> usize {
        self.tables.len() + self.views.len() + self.collections.len()
    }

    /// Finds a table by its unqualified name
    pub fn find_table(&self, pure_name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.pure_name == pure_name)
    }

    /// Finds a collection by name
    pub fn find_collection(&self, pure_name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.pure_name == pure_name)
    }
}

/// Rows returned by a single query round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,
    /// One JSON object per row, keyed by column name
    pub rows: Vec<JsonValue>,
    /// True when the server had more rows than the row bound allowed
    pub truncated: bool,
}

impl QueryResult {
    /// Creates an empty result (statements that return no rows)
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
        }
    }
}

/// Options for reading one page of a table or collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPageOptions {
    /// Table or collection name
    pub pure_name: String,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_page_limit")]
    pub limit: u32,
    /// Document filter (document engines only)
    #[serde(default)]
    pub filter: Option<JsonValue>,
    /// Sort specification as `{ "field": 1 | -1 }`
    #[serde(default)]
    pub sort: Option<JsonValue>,
}

fn default_page_limit() -> u32 {
    100
}

impl CollectionPageOptions {
    /// Creates page options for the named table or collection
    pub fn new(pure_name: impl Into<String>) -> Self {
        Self {
            pure_name: pure_name.into(),
            skip: 0,
            limit: default_page_limit(),
            filter: None,
            sort: None,
        }
    }

    /// Builder method to set skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Builder method to set limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Builder method to set the document filter.
    pub fn with_filter(mut self, filter: JsonValue) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder method to set the sort specification.
    pub fn with_sort(mut self, sort: JsonValue) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Validates the options before any session is touched.
    ///
    /// # Errors
    /// Returns a validation error if the name is empty, the limit is zero,
    /// or filter/sort are not JSON objects
    pub fn validate(&self) -> crate::Result<()> {
        if self.pure_name.trim().is_empty() {
            return Err(crate::error::TinyDbError::validation(
                "collection name is required",
            ));
        }
        if self.limit == 0 {
            return Err(crate::error::TinyDbError::validation(
                "limit must be greater than 0",
            ));
        }
        if let Some(filter) = &self.filter {
            if !filter.is_object() {
                return Err(crate::error::TinyDbError::validation(
                    "filter must be a JSON object",
                ));
            }
        }
        if let Some(sort) = &self.sort {
            let valid = sort.as_object().is_some_and(|fields| {
                fields
                    .values()
                    .all(|v| matches!(v.as_i64(), Some(1) | Some(-1)))
            });
            if !valid {
                return Err(crate::error::TinyDbError::validation(
                    "sort must map field names to 1 or -1",
                ));
            }
        }
        Ok(())
    }

    /// Sort fields ordered by name, `true` meaning descending
    pub fn sort_fields(&self) -> Vec<(String, bool)> {
        self.sort
            .as_ref()
            .and_then(JsonValue::as_object)
            .map(|fields| {
                let mut sorted: Vec<(String, bool)> = fields
                    .iter()
                    .map(|(name, dir)| (name.clone(), dir.as_i64() == Some(-1)))
                    .collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                sorted
            })
            .unwrap_or_default()
    }
}

/// One page of rows or documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    pub rows: Vec<JsonValue>,
    /// Total matching rows when the engine reports it cheaply
    pub total: Option<u64>,
    pub truncated: bool,
}
