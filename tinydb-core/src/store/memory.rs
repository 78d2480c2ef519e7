//! In-memory connection store.

use super::ConnectionStore;
use crate::Result;
use crate::config::ConnectionDescription;
use crate::error::TinyDbError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Connection store backed by a map, keyed by connection id.
///
/// # Example
/// ```rust
/// use tinydb_core::config::ConnectionDescription;
/// use tinydb_core::models::DatabaseType;
/// use tinydb_core::store::InMemoryConnectionStore;
///
/// let store = InMemoryConnectionStore::new();
/// store.insert(ConnectionDescription::new("c1", DatabaseType::SQLite).with_file(":memory:"));
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<BTreeMap<String, ConnectionDescription>>,
}

impl InMemoryConnectionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a connection, returning the previous description.
    pub fn insert(&self, description: ConnectionDescription) -> Option<ConnectionDescription> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(description.id.clone(), description)
    }

    /// Removes a connection.
    pub fn remove(&self, connection_id: &str) -> Option<ConnectionDescription> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id)
    }

    /// Number of stored connections
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Checks whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn resolve(&self, connection_id: &str) -> Result<ConnectionDescription> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .cloned()
            .ok_or_else(|| TinyDbError::not_found(connection_id))
    }

    async fn list(&self) -> Result<Vec<ConnectionDescription>> {
        Ok(self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}
