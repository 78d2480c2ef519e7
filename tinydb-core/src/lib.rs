//! Core of tinydb: the connection session manager and its collaborators.
//!
//! This crate turns stored connection descriptions into live, monitored
//! database sessions. It keeps exactly one session per (connection,
//! database) pair, analyzes and caches schema structure, serializes
//! requests against each session and recovers when a link fails.
//!
//! # Security Guarantees
//! - Decrypted credentials live in zeroizing memory and are never logged
//! - Connection URLs are redacted in every error message
//!
//! # Architecture
//! - Driver boundary (`adapters`) abstracting engine protocol clients
//! - Schema analyzers selected by engine kind (`analyzer`)
//! - Connection store resolving ids into descriptions (`store`)
//! - Session registry, handshake and request router (`session`)

pub mod adapters;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod security;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use adapters::{DatabaseAdapter, Driver, EngineDriver};
pub use analyzer::{AnalysisOutcome, AnalyzerRegistry, FullAnalyzer, SchemaAnalyzer};
pub use config::{ConnectionDescription, SessionConfig};
pub use error::{Result, TinyDbError};
pub use models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion,
};
pub use session::{
    ChangeEvent, ChangeKind, SessionInfo, SessionKey, SessionRegistry, SessionRequest,
    SessionResponse, SessionStatus, StatusName, StatusReport,
};
pub use store::{ConnectionStore, InMemoryConnectionStore, JsonLinesStore};
