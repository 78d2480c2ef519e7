//! Connection store collaborators.
//!
//! The session registry only needs to turn a connection id into a resolved
//! [`ConnectionDescription`] with decrypted secrets. Persisting, editing and
//! deleting stored connections happens elsewhere.
//!
//! # Module Structure
//! - `jsonl`: Reads the JSON-lines connections file
//! - `memory`: In-memory store for tests and embedders

mod jsonl;
mod memory;

pub use jsonl::{CONNECTIONS_FILE, JsonLinesStore, default_data_dir};
pub use memory::InMemoryConnectionStore;

use crate::Result;
use crate::config::ConnectionDescription;
use async_trait::async_trait;

/// Resolves stored connection ids into connection descriptions.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Resolves one connection id.
    ///
    /// # Errors
    /// Returns [`crate::TinyDbError::NotFound`] for unknown ids
    async fn resolve(&self, connection_id: &str) -> Result<ConnectionDescription>;

    /// Lists every stored connection.
    async fn list(&self) -> Result<Vec<ConnectionDescription>>;
}
