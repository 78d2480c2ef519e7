//! SQLite session integration tests.
//!
//! Runs the real engine driver against database files in a temporary
//! directory, going through the connection store, registry and router.

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use tinydb_core::config::{ConnectionDescription, SessionConfig};
use tinydb_core::models::{CollectionPageOptions, DatabaseType};
use tinydb_core::session::{SessionRegistry, StatusName};
use tinydb_core::store::InMemoryConnectionStore;
use tinydb_core::{EngineDriver, TinyDbError};

fn sqlite_registry(dir: &tempfile::TempDir) -> SessionRegistry {
    let path = dir.path().join("app.db");
    let store = InMemoryConnectionStore::new();
    store.insert(
        ConnectionDescription::new("lite", DatabaseType::SQLite)
            .with_file(path.to_string_lossy())
            .with_option("create", "true"),
    );
    store.insert(
        ConnectionDescription::new("absent", DatabaseType::SQLite)
            .with_file(dir.path().join("missing.db").to_string_lossy()),
    );

    let config = SessionConfig::default().with_max_rows(2);
    SessionRegistry::new(
        Arc::new(store),
        Arc::new(EngineDriver::new(config.clone())),
        config,
    )
    .unwrap()
}

async fn seed(registry: &SessionRegistry) {
    for statement in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE INDEX idx_users_name ON users(name)",
        "INSERT INTO users (name) VALUES ('ada'), ('brian'), ('grace')",
    ] {
        registry.execute_query("lite", "main", statement).await.unwrap();
    }
}

#[tokio::test]
async fn test_sqlite_session_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sqlite_registry(&dir);

    let session = registry.ensure_open("lite", "main").await.unwrap();
    assert_eq!(session.status.name, StatusName::Ok);
    assert!(session
        .server_version
        .as_ref()
        .is_some_and(|v| v.version_text.starts_with("SQLite")));
    assert!(session.structure.as_ref().is_some_and(|s| s.tables.is_empty()));

    seed(&registry).await;

    let result = registry
        .execute_query("lite", "main", "SELECT id, name FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(result.rows.len(), 2);
    assert!(result.truncated);
    assert_eq!(result.rows[0]["name"], "ada");

    let page = registry
        .collection_page(
            "lite",
            "main",
            CollectionPageOptions::new("users")
                .with_sort(serde_json::json!({"id": -1}))
                .with_limit(1),
        )
        .await
        .unwrap();
    assert_eq!(page.total, Some(3));
    assert_eq!(page.rows[0]["name"], "grace");

    registry.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_refresh_picks_up_new_tables() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sqlite_registry(&dir);
    seed(&registry).await;

    let refreshed = registry.refresh("lite", "main", false).await.unwrap();
    let structure = refreshed.structure.unwrap();
    let users = structure.find_table("users").unwrap();
    assert_eq!(users.columns.len(), 2);
    assert!(users.indexes.iter().any(|i| i.name == "idx_users_name"));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_statement_error_keeps_session() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sqlite_registry(&dir);

    let error = registry
        .execute_query("lite", "main", "SELECT * FROM nowhere")
        .await
        .unwrap_err();
    assert!(matches!(error, TinyDbError::QueryExecution { .. }));
    assert_eq!(registry.live_count().await, 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_missing_file_fails_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sqlite_registry(&dir);

    let session = registry.ensure_open("absent", "main").await.unwrap();

    assert_eq!(session.status.name, StatusName::Error);
    assert!(!session.disconnected);
    assert!(session.structure.is_none());
}
