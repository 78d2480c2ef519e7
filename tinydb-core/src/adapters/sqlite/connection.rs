//! Opening SQLite database files.
//!
//! Supported description options:
//! - `create`: `"true"` creates the file when it does not exist
//! - `readOnly`: `"true"` opens the file read-only

use super::SqliteAdapter;
use crate::Result;
use crate::config::{ConnectionDescription, SessionConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

const MEMORY_PATH: &str = ":memory:";

impl SqliteAdapter {
    /// Opens the description's database file.
    ///
    /// # Errors
    /// Returns a configuration error when no file is configured and a
    /// connection error when the file cannot be opened
    pub async fn connect(
        description: &ConnectionDescription,
        database: &str,
        config: &SessionConfig,
    ) -> Result<Self> {
        let path = description
            .file_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                crate::error::TinyDbError::configuration(
                    "SQLite connections require a database file",
                )
            })?;

        if !database.is_empty() {
            tracing::debug!(
                "SQLite session for '{}' ignores database name '{}'",
                description.label(),
                database
            );
        }

        let options = connect_options(path, description)?;
        let in_memory = path == MEMORY_PATH;

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { config.max_connections.max(1) })
            .acquire_timeout(config.connect_timeout);
        if in_memory {
            // The data lives only as long as its one connection
            pool_options = pool_options
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>);
        }

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            crate::error::TinyDbError::connection_failed(
                format!("Failed to open SQLite database '{}'", path),
                e,
            )
        })?;

        tracing::debug!("Opened SQLite database '{}'", path);

        Ok(Self {
            pool,
            path: path.to_string(),
        })
    }

    /// Checks if the session is bound to an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

fn flag(description: &ConnectionDescription, key: &str) -> bool {
    description
        .options
        .get(key)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Builds connect options for a file path or `:memory:`.
fn connect_options(path: &str, description: &ConnectionDescription) -> Result<SqliteConnectOptions> {
    let options = if path == MEMORY_PATH {
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            crate::error::TinyDbError::configuration(format!(
                "Invalid in-memory SQLite options: {}",
                e
            ))
        })?
    } else {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(flag(description, "create"))
    };

    Ok(options.read_only(flag(description, "readOnly")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    #[test]
    fn test_flag_parsing() {
        let description = ConnectionDescription::new("c1", DatabaseType::SQLite)
            .with_file("a.db")
            .with_option("create", "TRUE")
            .with_option("readOnly", "no");

        assert!(flag(&description, "create"));
        assert!(!flag(&description, "readOnly"));
        assert!(!flag(&description, "missing"));
    }

    #[tokio::test]
    async fn test_connect_missing_file_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let description = ConnectionDescription::new("c1", DatabaseType::SQLite)
            .with_file(path.to_string_lossy());

        let result = SqliteAdapter::connect(&description, "", &SessionConfig::default()).await;
        assert!(matches!(
            result,
            Err(crate::error::TinyDbError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let description =
            ConnectionDescription::new("c1", DatabaseType::SQLite).with_file(":memory:");

        let adapter = SqliteAdapter::connect(&description, "main", &SessionConfig::default())
            .await
            .unwrap();
        assert!(adapter.is_in_memory());
        adapter.pool.close().await;
    }
}
