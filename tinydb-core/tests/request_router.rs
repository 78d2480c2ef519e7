//! Request router integration tests.
//!
//! This test suite covers:
//! - Query, page and database-list requests against open sessions
//! - Close-on-transport-failure and the following fresh handshake
//! - Validation before any session is touched
//! - Timeouts, forced termination and per-session serialization

mod common;

use common::{registry, registry_with};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tinydb_core::config::SessionConfig;
use tinydb_core::models::CollectionPageOptions;
use tinydb_core::session::{SessionRequest, SessionResponse, StatusName};
use tinydb_core::TinyDbError;

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn test_route_query_returns_driver_rows() {
    let (registry, _) = registry();
    let session = registry.ensure_open("c1", "app").await.unwrap();

    let response = registry
        .route(
            &session,
            SessionRequest::ExecuteQuery {
                statement: "SELECT * FROM users".to_string(),
            },
        )
        .await
        .unwrap();

    match response {
        SessionResponse::Rows(result) => {
            assert_eq!(result.columns, vec!["statement", "database"]);
            assert_eq!(result.rows[0]["statement"], "SELECT * FROM users");
            assert_eq!(result.rows[0]["database"], "app");
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_route_collection_page_applies_row_bound() {
    let config = SessionConfig::default().with_max_rows(10);
    let (registry, _) = registry_with(config);
    let session = registry.ensure_open("c1", "app").await.unwrap();

    let response = registry
        .route(
            &session,
            SessionRequest::ReadCollectionPage(CollectionPageOptions::new("users").with_limit(50)),
        )
        .await
        .unwrap();

    match response {
        SessionResponse::Page(page) => {
            assert_eq!(page.rows.len(), 10);
            assert!(page.truncated);
            assert_eq!(page.total, Some(1000));
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_list_databases() {
    let (registry, _) = registry();
    let databases = registry.list_databases("c1", "").await.unwrap();
    assert_eq!(databases, vec!["analytics", "app"]);
}

#[tokio::test]
async fn test_collection_page_opens_session() {
    let (registry, state) = registry();
    let page = registry
        .collection_page("c1", "app", CollectionPageOptions::new("users").with_limit(3))
        .await
        .unwrap();

    assert_eq!(page.rows.len(), 3);
    assert!(!page.truncated);
    assert_eq!(state.opens(), 1);
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn test_transport_failure_closes_session() {
    let (registry, state) = registry();
    let session = registry.ensure_open("c1", "app").await.unwrap();

    let error = registry.execute_query("c1", "app", "BREAK").await.unwrap_err();

    assert!(error.is_transport());
    assert_eq!(registry.live_count().await, 0);
    assert_eq!(state.closes(), 1);

    let snapshot = registry.closed_snapshot("c1", "app").await.unwrap();
    assert_eq!(snapshot.status.name, StatusName::Error);
    assert!(snapshot.status.message.as_deref().unwrap().contains("Query failed"));
    assert!(snapshot.status.counter > session.status.counter);
    assert_eq!(snapshot.structure, session.structure);

    let report = registry.status("c1", "app").await;
    assert!(!report.live);
    assert_eq!(report.status, snapshot.status);

    // The next call re-runs the full handshake
    let result = registry.execute_query("c1", "app", "SELECT 1").await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(state.opens(), 2);

    let reopened = registry.ensure_open("c1", "app").await.unwrap();
    assert_ne!(reopened.session_id, session.session_id);
    assert_eq!(reopened.status.name, StatusName::Ok);
}

#[tokio::test]
async fn test_statement_error_keeps_session() {
    let (registry, state) = registry();
    let session = registry.ensure_open("c1", "app").await.unwrap();

    let error = registry.execute_query("c1", "app", "BAD").await.unwrap_err();

    assert!(matches!(error, TinyDbError::QueryExecution { .. }));
    assert_eq!(registry.live_count().await, 1);
    assert_eq!(state.closes(), 0);

    let still_open = registry.ensure_open("c1", "app").await.unwrap();
    assert_eq!(still_open.session_id, session.session_id);
}

#[tokio::test]
async fn test_failure_on_one_key_leaves_others_alone() {
    let (registry, _) = registry();
    registry.ensure_open("c1", "app").await.unwrap();
    registry.ensure_open("c2", "app").await.unwrap();

    registry.execute_query("c1", "app", "BREAK").await.unwrap_err();

    let report = registry.status("c2", "app").await;
    assert!(report.live);
    assert_eq!(report.status.name, StatusName::Ok);
}

#[tokio::test]
async fn test_invalid_requests_touch_no_session() {
    let (registry, state) = registry();

    let error = registry.execute_query("c1", "app", "  ").await.unwrap_err();
    assert!(matches!(error, TinyDbError::Validation { .. }));

    let error = registry
        .collection_page("c1", "app", CollectionPageOptions::new("users").with_limit(0))
        .await
        .unwrap_err();
    assert!(matches!(error, TinyDbError::Validation { .. }));

    assert_eq!(state.opens(), 0);
    assert_eq!(registry.live_count().await, 0);
}

#[tokio::test]
async fn test_route_on_closed_session_is_rejected() {
    let (registry, state) = registry();
    let session = registry.ensure_open("c1", "app").await.unwrap();
    registry.close("c1", "app", false).await;

    let error = registry
        .route(&session, SessionRequest::ListDatabases)
        .await
        .unwrap_err();

    assert!(matches!(error, TinyDbError::Handshake { .. }));
    // A stale view never reopens the key
    assert_eq!(state.opens(), 1);
    assert_eq!(registry.live_count().await, 0);
}

#[tokio::test]
async fn test_query_timeout_closes_session() {
    let config = SessionConfig::default().with_query_timeout(Duration::from_millis(50));
    let (registry, _) = registry_with(config);
    registry.ensure_open("c1", "app").await.unwrap();

    let error = registry.execute_query("c1", "app", "SLOW").await.unwrap_err();

    assert!(matches!(error, TinyDbError::Timeout { .. }));
    assert_eq!(registry.live_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_close_cancels_in_flight_query() {
    let (registry, state) = registry();
    let registry = Arc::new(registry);
    registry.ensure_open("c1", "app").await.unwrap();

    let query = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.execute_query("c1", "app", "SLOW").await })
    };
    state.query_started.notified().await;

    assert!(registry.disconnect("c1", "app").await);

    let error = query.await.unwrap().unwrap_err();
    assert!(matches!(error, TinyDbError::Cancelled { .. }));
    assert_eq!(state.terminates(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_on_one_session_are_serialized() {
    let (registry, state) = registry();
    let registry = Arc::new(registry);
    registry.ensure_open("c1", "app").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.execute_query("c1", "app", "NAP").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 1);
}
