//! Structure analyzers.
//!
//! An analyzer produces the structure document of one database during the
//! handshake. When a previous structure is known (from a closed snapshot or
//! an earlier pass) the analyzer may report that nothing changed, so the
//! session keeps the structure it already has.

use crate::Result;
use crate::adapters::DatabaseAdapter;
use crate::models::{DatabaseStructure, DatabaseType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The structure differs from the previous one (or none was known)
    Changed(DatabaseStructure),
    /// The previous structure is still accurate
    Unchanged,
}

/// Produces a structure document for a database through an open session.
#[async_trait]
pub trait SchemaAnalyzer: Send + Sync {
    /// Analyzes `database`, comparing against `previous` when given.
    ///
    /// # Errors
    /// Returns the adapter's error; transport failures must be passed
    /// through unchanged so the session can be closed
    async fn analyze(
        &self,
        session: &dyn DatabaseAdapter,
        database: &str,
        previous: Option<&DatabaseStructure>,
    ) -> Result<AnalysisOutcome>;
}

/// Analyzer that always collects the complete structure and compares it
/// with the previous one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullAnalyzer;

#[async_trait]
impl SchemaAnalyzer for FullAnalyzer {
    async fn analyze(
        &self,
        session: &dyn DatabaseAdapter,
        database: &str,
        previous: Option<&DatabaseStructure>,
    ) -> Result<AnalysisOutcome> {
        let start_time = std::time::Instant::now();
        let structure = session.collect_structure().await?;

        tracing::debug!(
            "Analyzed {} database '{}' in {:.2}s ({} objects)",
            session.database_type(),
            database,
            start_time.elapsed().as_secs_f64(),
            structure.object_count()
        );

        if previous == Some(&structure) {
            Ok(AnalysisOutcome::Unchanged)
        } else {
            Ok(AnalysisOutcome::Changed(structure))
        }
    }
}

/// Maps engine kinds to analyzers, with a fallback for unregistered kinds.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use tinydb_core::analyzer::{AnalyzerRegistry, FullAnalyzer};
/// use tinydb_core::models::DatabaseType;
///
/// let registry = AnalyzerRegistry::default()
///     .with_analyzer(DatabaseType::MongoDB, Arc::new(FullAnalyzer));
/// let _analyzer = registry.for_engine(DatabaseType::SQLite);
/// ```
#[derive(Clone)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<DatabaseType, Arc<dyn SchemaAnalyzer>>,
    fallback: Arc<dyn SchemaAnalyzer>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(FullAnalyzer))
    }
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerRegistry")
            .field("engines", &self.analyzers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl AnalyzerRegistry {
    /// Creates a registry that uses `fallback` for every engine.
    pub fn new(fallback: Arc<dyn SchemaAnalyzer>) -> Self {
        Self {
            analyzers: HashMap::new(),
            fallback,
        }
    }

    /// Builder method to register an analyzer for one engine kind.
    pub fn with_analyzer(mut self, engine: DatabaseType, analyzer: Arc<dyn SchemaAnalyzer>) -> Self {
        self.analyzers.insert(engine, analyzer);
        self
    }

    /// Gets the analyzer for an engine kind.
    pub fn for_engine(&self, engine: DatabaseType) -> Arc<dyn SchemaAnalyzer> {
        self.analyzers
            .get(&engine)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionPageOptions, QueryResult, ServerVersion, TableInfo};

    struct StaticAdapter {
        structure: DatabaseStructure,
    }

    #[async_trait]
    impl DatabaseAdapter for StaticAdapter {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::SQLite
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn server_version(&self) -> Result<ServerVersion> {
            Ok(ServerVersion {
                version: "3".to_string(),
                version_text: "SQLite 3".to_string(),
            })
        }
        async fn list_databases(&self) -> Result<Vec<String>> {
            Ok(vec!["main".to_string()])
        }
        async fn execute_query(&self, _statement: &str, _max_rows: u32) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }
        async fn collect_structure(&self) -> Result<DatabaseStructure> {
            Ok(self.structure.clone())
        }
        async fn close(&self) {}
    }

    fn structure_with(table: &str) -> DatabaseStructure {
        let mut structure = DatabaseStructure::empty(DatabaseType::SQLite);
        structure.tables.push(TableInfo {
            pure_name: table.to_string(),
            schema_name: None,
            columns: Vec::new(),
            indexes: Vec::new(),
        });
        structure
    }

    #[tokio::test]
    async fn test_full_analyzer_reports_changes() {
        let adapter = StaticAdapter {
            structure: structure_with("users"),
        };

        let outcome = FullAnalyzer.analyze(&adapter, "main", None).await.unwrap();
        assert_eq!(outcome, AnalysisOutcome::Changed(structure_with("users")));

        let previous = structure_with("orders");
        let outcome = FullAnalyzer
            .analyze(&adapter, "main", Some(&previous))
            .await
            .unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Changed(_)));
    }

    #[tokio::test]
    async fn test_full_analyzer_reports_unchanged() {
        let adapter = StaticAdapter {
            structure: structure_with("users"),
        };
        let previous = structure_with("users");

        let outcome = FullAnalyzer
            .analyze(&adapter, "main", Some(&previous))
            .await
            .unwrap();
        assert_eq!(outcome, AnalysisOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_default_page_reads_are_unsupported() {
        let adapter = StaticAdapter {
            structure: structure_with("users"),
        };
        let result = adapter
            .read_collection_page(&CollectionPageOptions::new("users"), 10)
            .await;
        assert!(matches!(
            result,
            Err(crate::error::TinyDbError::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_registry_falls_back() {
        struct Marker;

        #[async_trait]
        impl SchemaAnalyzer for Marker {
            async fn analyze(
                &self,
                _session: &dyn DatabaseAdapter,
                _database: &str,
                _previous: Option<&DatabaseStructure>,
            ) -> Result<AnalysisOutcome> {
                Ok(AnalysisOutcome::Unchanged)
            }
        }

        let marker: Arc<dyn SchemaAnalyzer> = Arc::new(Marker);
        let registry =
            AnalyzerRegistry::default().with_analyzer(DatabaseType::MongoDB, Arc::clone(&marker));

        assert!(Arc::ptr_eq(&registry.for_engine(DatabaseType::MongoDB), &marker));
        assert!(!Arc::ptr_eq(&registry.for_engine(DatabaseType::SQLite), &marker));
    }
}
