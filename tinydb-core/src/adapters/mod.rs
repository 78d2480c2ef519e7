//! Driver boundary between the session manager and database engines.
//!
//! The session registry never talks to a protocol client directly. It asks a
//! [`Driver`] to open a session for a connection description and then works
//! with the returned [`DatabaseAdapter`] through dynamic dispatch, so tests
//! can substitute scripted drivers for real engines.
//!
//! # Module Structure
//! - `helpers`: Shared row conversion and error classification
//! - Engine modules (`sqlite`, `mysql`, `mongodb`), each behind its feature

use crate::Result;
use crate::config::{ConnectionDescription, SessionConfig};
use crate::models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion,
};
use async_trait::async_trait;
use std::sync::Arc;

pub(crate) mod helpers;

#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// One open driver session bound to a single database.
///
/// # Object Safety
/// This trait is object-safe. The session registry holds adapters as
/// `Arc<dyn DatabaseAdapter>` so a request can keep using an adapter while
/// the registry is free to serve other keys.
///
/// # Errors
/// Methods return [`crate::TinyDbError::Transport`] (or a timeout) when the
/// link to the server is broken. Any other error leaves the session usable.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Returns the engine this adapter talks to.
    fn database_type(&self) -> DatabaseType;

    /// Round-trips a trivial command to prove the link is alive.
    async fn ping(&self) -> Result<()>;

    /// Fetches the server version.
    async fn server_version(&self) -> Result<ServerVersion>;

    /// Lists the databases visible to this session.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Executes a statement and returns at most `max_rows` rows.
    async fn execute_query(&self, statement: &str, max_rows: u32) -> Result<QueryResult>;

    /// Reads one page of a table or collection.
    ///
    /// # Default Implementation
    /// Returns an unsupported-feature error.
    async fn read_collection_page(
        &self,
        _options: &CollectionPageOptions,
        _max_rows: u32,
    ) -> Result<CollectionPage> {
        Err(crate::error::TinyDbError::unsupported_feature(
            "Collection pages",
            self.database_type().to_string(),
        ))
    }

    /// Collects the full structure of the bound database.
    async fn collect_structure(&self) -> Result<DatabaseStructure>;

    /// Closes the session gracefully. Calling it twice is harmless.
    async fn close(&self);

    /// Tears the session down without waiting for in-flight work.
    ///
    /// # Default Implementation
    /// Falls back to [`DatabaseAdapter::close`].
    async fn terminate(&self) {
        self.close().await;
    }
}

/// Opens driver sessions for connection descriptions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a session on `database` for the described connection.
    ///
    /// An empty `database` means the engine default (or the description's
    /// default database).
    ///
    /// # Errors
    /// Returns a connection error if the session cannot be opened
    async fn open(
        &self,
        description: &ConnectionDescription,
        database: &str,
    ) -> Result<Arc<dyn DatabaseAdapter>>;
}

/// Driver that dispatches on the description's engine kind.
///
/// Engines whose feature is not compiled in fail with an
/// unsupported-feature error naming the feature to enable.
#[derive(Debug, Clone)]
pub struct EngineDriver {
    config: SessionConfig,
}

impl EngineDriver {
    /// Creates a driver applying the given session bounds.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl Default for EngineDriver {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[async_trait]
impl Driver for EngineDriver {
    async fn open(
        &self,
        description: &ConnectionDescription,
        database: &str,
    ) -> Result<Arc<dyn DatabaseAdapter>> {
        description.validate()?;

        match description.engine {
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => {
                let adapter =
                    mysql::MySqlAdapter::connect(description, database, &self.config).await?;
                Ok(Arc::new(adapter))
            }
            #[cfg(not(feature = "mysql"))]
            DatabaseType::MySQL => Err(crate::error::TinyDbError::unsupported_feature(
                "MySQL driver",
                "Compile with --features mysql to enable MySQL support",
            )),
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => {
                let adapter =
                    sqlite::SqliteAdapter::connect(description, database, &self.config).await?;
                Ok(Arc::new(adapter))
            }
            #[cfg(not(feature = "sqlite"))]
            DatabaseType::SQLite => Err(crate::error::TinyDbError::unsupported_feature(
                "SQLite driver",
                "Compile with --features sqlite to enable SQLite support",
            )),
            #[cfg(feature = "mongodb")]
            DatabaseType::MongoDB => {
                let adapter =
                    mongodb::MongoAdapter::connect(description, database, &self.config).await?;
                Ok(Arc::new(adapter))
            }
            #[cfg(not(feature = "mongodb"))]
            DatabaseType::MongoDB => Err(crate::error::TinyDbError::unsupported_feature(
                "MongoDB driver",
                "Compile with --features mongodb to enable MongoDB support",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_driver_rejects_invalid_description() {
        let driver = EngineDriver::default();
        let description = ConnectionDescription::new("c1", DatabaseType::SQLite);

        let result = driver.open(&description, "").await;
        assert!(matches!(
            result,
            Err(crate::error::TinyDbError::Configuration { .. })
        ));
    }

    #[cfg(not(feature = "mongodb"))]
    #[tokio::test]
    async fn test_engine_driver_without_mongodb_feature() {
        let driver = EngineDriver::default();
        let description =
            ConnectionDescription::new("c1", DatabaseType::MongoDB).with_url("mongodb://localhost");

        let result = driver.open(&description, "app").await;
        assert!(matches!(
            result,
            Err(crate::error::TinyDbError::UnsupportedFeature { .. })
        ));
    }
}
