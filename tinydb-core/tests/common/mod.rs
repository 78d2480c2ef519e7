//! Scripted in-memory driver shared by the session manager tests.
//!
//! Statements understood by [`MockAdapter::execute_query`]:
//! - `BREAK`: fails with a transport error
//! - `BAD`: fails with a statement error
//! - `SLOW`: never finishes (until cancelled or timed out)
//! - `NAP`: sleeps briefly, tracking how many requests overlap
//! - anything else: echoes the statement back as one row

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tinydb_core::adapters::{DatabaseAdapter, Driver};
use tinydb_core::config::{ConnectionDescription, SessionConfig};
use tinydb_core::models::{
    CollectionPage, CollectionPageOptions, DatabaseStructure, DatabaseType, QueryResult,
    ServerVersion, TableInfo,
};
use tinydb_core::session::SessionRegistry;
use tinydb_core::store::InMemoryConnectionStore;
use tinydb_core::{Result, TinyDbError};
use tokio::sync::Notify;

/// Knobs and counters shared by a driver and every adapter it opens.
#[derive(Default)]
pub struct MockState {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub terminates: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_analysis: AtomicBool,
    pub fail_ping: AtomicBool,
    pub open_delay_ms: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub query_started: Notify,
    pub tables: Mutex<Vec<String>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state
            .tables
            .lock()
            .unwrap()
            .push("users".to_string());
        Arc::new(state)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub fn set_tables(&self, tables: &[&str]) {
        *self.tables.lock().unwrap() = tables.iter().map(|t| t.to_string()).collect();
    }
}

fn link_error(context: &str) -> TinyDbError {
    TinyDbError::transport_failed(
        context,
        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer"),
    )
}

pub struct MockDriver {
    pub state: Arc<MockState>,
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(
        &self,
        description: &ConnectionDescription,
        database: &str,
    ) -> Result<Arc<dyn DatabaseAdapter>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(TinyDbError::connection_failed(
                format!("Failed to connect to {}", description),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }

        Ok(Arc::new(MockAdapter {
            state: Arc::clone(&self.state),
            database: database.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockAdapter {
    state: Arc<MockState>,
    database: String,
    closed: AtomicBool,
}

impl MockAdapter {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(link_error("Mock session is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()?;
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(link_error("Ping failed"));
        }
        Ok(())
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        self.check_open()?;
        Ok(ServerVersion {
            version: "8.0.36".to_string(),
            version_text: "MySQL 8.0.36".to_string(),
        })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.check_open()?;
        Ok(vec!["analytics".to_string(), "app".to_string()])
    }

    async fn execute_query(&self, statement: &str, max_rows: u32) -> Result<QueryResult> {
        self.check_open()?;
        match statement {
            "BREAK" => Err(link_error("Query failed")),
            "BAD" => Err(TinyDbError::query_failed("You have an error in your SQL syntax")),
            "SLOW" => {
                self.state.query_started.notify_one();
                std::future::pending::<()>().await;
                Ok(QueryResult::empty())
            }
            "NAP" => {
                let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(QueryResult::empty())
            }
            other => Ok(QueryResult {
                columns: vec!["statement".to_string(), "database".to_string()],
                rows: vec![json!({"statement": other, "database": self.database})],
                truncated: max_rows < 1,
            }),
        }
    }

    async fn read_collection_page(
        &self,
        options: &CollectionPageOptions,
        max_rows: u32,
    ) -> Result<CollectionPage> {
        self.check_open()?;
        let count = options.limit.min(max_rows);
        Ok(CollectionPage {
            rows: (0..count).map(|n| json!({"n": n})).collect(),
            total: Some(1000),
            truncated: options.limit > max_rows,
        })
    }

    async fn collect_structure(&self) -> Result<DatabaseStructure> {
        self.check_open()?;
        if self.state.fail_analysis.load(Ordering::SeqCst) {
            return Err(link_error("Analysis failed"));
        }
        let mut structure = DatabaseStructure::empty(DatabaseType::MySQL);
        for table in self.state.tables.lock().unwrap().iter() {
            structure.tables.push(TableInfo {
                pure_name: table.clone(),
                schema_name: Some(self.database.clone()),
                columns: Vec::new(),
                indexes: Vec::new(),
            });
        }
        Ok(structure)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn terminate(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.terminates.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Store holding `c1` and `c2` (MySQL descriptions served by the mock).
pub fn store() -> Arc<InMemoryConnectionStore> {
    let store = InMemoryConnectionStore::new();
    for id in ["c1", "c2"] {
        store.insert(
            ConnectionDescription::new(id, DatabaseType::MySQL)
                .with_host("db.internal")
                .with_credentials("app", Some("secret".to_string())),
        );
    }
    Arc::new(store)
}

pub fn registry_with(config: SessionConfig) -> (SessionRegistry, Arc<MockState>) {
    let state = MockState::new();
    let driver = Arc::new(MockDriver {
        state: Arc::clone(&state),
    });
    let registry = SessionRegistry::new(store(), driver, config).unwrap();
    (registry, state)
}

pub fn registry() -> (SessionRegistry, Arc<MockState>) {
    registry_with(SessionConfig::default())
}
