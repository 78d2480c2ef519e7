//! Unit tests for the MongoDB driver that need no running server.

use super::{connection_url, document_to_json, json_to_document, reply_rows};
use crate::config::ConnectionDescription;
use crate::error::TinyDbError;
use crate::models::DatabaseType;
use mongodb::bson::{Bson, doc, oid::ObjectId};
use serde_json::json;

// =============================================================================
// Connection URL Tests
// =============================================================================

#[test]
fn test_connection_url_from_host() {
    let description = ConnectionDescription::new("c1", DatabaseType::MongoDB).with_host("db:27018");
    let url = connection_url(&description).unwrap();
    assert_eq!(url.as_str(), "mongodb://db:27018/");
}

#[test]
fn test_connection_url_encodes_credentials() {
    let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
        .with_host("db")
        .with_credentials("app user", Some("p@ss:word".to_string()));

    let url = connection_url(&description).unwrap();
    assert_eq!(url.username(), "app%20user");
    assert_eq!(url.password(), Some("p%40ss%3Aword"));
    assert_eq!(url.port(), Some(27017));
}

#[test]
fn test_connection_url_prefers_explicit_url() {
    let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
        .with_host("ignored")
        .with_url("mongodb+srv://cluster.example.net/app");

    let url = connection_url(&description).unwrap();
    assert_eq!(url.host_str(), Some("cluster.example.net"));
}

#[test]
fn test_connection_url_rejects_other_schemes() {
    let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
        .with_url("mysql://root:secret@db/app");

    let error = connection_url(&description).unwrap_err();
    assert!(matches!(error, TinyDbError::Configuration { .. }));
    assert!(!error.to_string().contains("secret"));
}

#[test]
fn test_connection_url_requires_host() {
    let description = ConnectionDescription::new("c1", DatabaseType::MongoDB);
    assert!(connection_url(&description).is_err());
}

// =============================================================================
// Document Conversion Tests
// =============================================================================

#[test]
fn test_json_to_document_accepts_extended_json() {
    let document = json_to_document(
        &json!({"_id": {"$oid": "65a1b2c3d4e5f60718293a4b"}, "n": 1}),
        "Filter",
    )
    .unwrap();

    assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
}

#[test]
fn test_json_to_document_rejects_non_objects() {
    let error = json_to_document(&json!([1, 2]), "Filter").unwrap_err();
    assert!(matches!(error, TinyDbError::QueryExecution { .. }));
    assert!(!error.is_transport());
}

#[test]
fn test_document_to_json_uses_relaxed_format() {
    let id = ObjectId::parse_str("65a1b2c3d4e5f60718293a4b").unwrap();
    let value = document_to_json(doc! { "_id": id, "count": 3_i64, "name": "ada" });

    assert_eq!(
        value,
        json!({"_id": {"$oid": "65a1b2c3d4e5f60718293a4b"}, "count": 3, "name": "ada"})
    );
}

// =============================================================================
// Reply Flattening Tests
// =============================================================================

#[test]
fn test_reply_rows_plain_reply_is_one_row() {
    let (rows, truncated, cursor) = reply_rows(doc! { "ok": 1.0, "n": 4 }, 10);
    assert_eq!(rows.len(), 1);
    assert!(!truncated);
    assert!(cursor.is_none());
}

#[test]
fn test_reply_rows_flattens_first_batch() {
    let reply = doc! {
        "cursor": {
            "id": 0_i64,
            "ns": "app.users",
            "firstBatch": [ { "name": "ada" }, { "name": "brian" } ],
        },
        "ok": 1.0,
    };

    let (rows, truncated, cursor) = reply_rows(reply, 10);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_str("name"), Ok("brian"));
    assert!(!truncated);
    assert!(cursor.is_none());
}

#[test]
fn test_reply_rows_bounds_rows_and_reports_open_cursor() {
    let reply = doc! {
        "cursor": {
            "id": 42_i64,
            "ns": "app.events",
            "firstBatch": [ { "n": 1 }, { "n": 2 }, { "n": 3 } ],
        },
        "ok": 1.0,
    };

    let (rows, truncated, cursor) = reply_rows(reply, 2);
    assert_eq!(rows.len(), 2);
    assert!(truncated);
    assert_eq!(cursor, Some(("app.events".to_string(), 42)));
}
