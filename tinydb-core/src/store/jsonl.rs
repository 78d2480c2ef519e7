//! JSON-lines connection store.
//!
//! Each line of the connections file is one stored connection object.
//! The file is re-read on every call so edits made by other processes are
//! picked up without a reload step. Secret fields go through a
//! [`SecretDecryptor`] before the description leaves the store.

use super::ConnectionStore;
use crate::Result;
use crate::config::ConnectionDescription;
use crate::error::TinyDbError;
use crate::models::DatabaseType;
use crate::security::{PlaintextSecrets, SecretDecryptor};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the connections file inside the data directory
pub const CONNECTIONS_FILE: &str = "connections.jsonl";

/// Returns the per-user data directory (`~/.tinydb`), if a home is known.
pub fn default_data_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".tinydb"))
}

/// Port as stored: frontends write either numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredPort {
    Number(u64),
    Text(String),
}

/// One line of the connections file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConnection {
    #[serde(rename = "_id")]
    id: String,
    engine: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default, alias = "server")]
    host: Option<String>,
    #[serde(default)]
    port: Option<StoredPort>,
    #[serde(default, alias = "user")]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    database_file: Option<String>,
    #[serde(default)]
    socket_path: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    default_database: Option<String>,
    #[serde(default)]
    options: BTreeMap<String, JsonValue>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl StoredConnection {
    fn into_description(self, decryptor: &dyn SecretDecryptor) -> Result<ConnectionDescription> {
        // Plugin-qualified engines look like `mysql@tinydb-plugin-mysql`
        let engine_name = self.engine.split('@').next().unwrap_or_default();
        let engine: DatabaseType = engine_name.parse()?;

        let port = match self.port {
            None => None,
            Some(StoredPort::Number(n)) => Some(u16::try_from(n).map_err(|_| {
                TinyDbError::configuration(format!("port {} of '{}' is out of range", n, self.id))
            })?),
            Some(StoredPort::Text(text)) if text.trim().is_empty() => None,
            Some(StoredPort::Text(text)) => Some(text.trim().parse::<u16>().map_err(|_| {
                TinyDbError::configuration(format!("port '{}' of '{}' is not a number", text, self.id))
            })?),
        };

        let password = match non_empty(self.password) {
            Some(stored) => Some(decryptor.decrypt("password", &stored)?.to_string()),
            None => None,
        };

        let url = match non_empty(self.url) {
            Some(stored) => Some(decryptor.decrypt("url", &stored)?.to_string()),
            None => None,
        };

        let options = self
            .options
            .into_iter()
            .filter_map(|(key, value)| match value {
                JsonValue::Null => None,
                JsonValue::String(text) => Some((key, text)),
                other => Some((key, other.to_string())),
            })
            .collect();

        let mut description = ConnectionDescription::new(self.id, engine);
        description.display_name = non_empty(self.display_name);
        description.host = non_empty(self.host);
        description.port = port;
        description.socket = non_empty(self.socket_path);
        description.default_database = non_empty(self.default_database);
        description.file_path = non_empty(self.database_file);
        description.url = url;
        description.options = options;
        if let Some(username) = non_empty(self.username) {
            description = description.with_credentials(username, password);
        } else if password.is_some() {
            description = description.with_credentials(String::new(), password);
        }

        Ok(description)
    }
}

/// Connection store reading a JSON-lines file.
///
/// # Example
/// ```rust,no_run
/// use tinydb_core::store::{ConnectionStore, JsonLinesStore};
///
/// # async fn example() -> tinydb_core::Result<()> {
/// let store = JsonLinesStore::new("/home/ada/.tinydb/connections.jsonl");
/// let description = store.resolve("c1").await?;
/// println!("{}", description);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JsonLinesStore {
    path: PathBuf,
    decryptor: Arc<dyn SecretDecryptor>,
}

impl std::fmt::Debug for JsonLinesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonLinesStore {
    /// Creates a store for the given file with plaintext secrets.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            decryptor: Arc::new(PlaintextSecrets),
        }
    }

    /// Builder method to set the secret decryptor.
    pub fn with_decryptor(mut self, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Path of the connections file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<StoredConnection>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Connections file {} does not exist", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(TinyDbError::Io {
                    context: format!("Failed to read {}", self.path.display()),
                    source: e,
                });
            }
        };

        let mut connections = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredConnection>(line) {
                Ok(connection) => connections.push(connection),
                Err(e) => {
                    // Error text may quote the line, which can hold secrets
                    tracing::warn!(
                        "Skipping malformed line {} of {} (column {})",
                        index.saturating_add(1),
                        self.path.display(),
                        e.column()
                    );
                }
            }
        }

        Ok(connections)
    }
}

#[async_trait]
impl ConnectionStore for JsonLinesStore {
    async fn resolve(&self, connection_id: &str) -> Result<ConnectionDescription> {
        let stored = self
            .load()
            .await?
            .into_iter()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| TinyDbError::not_found(connection_id))?;

        stored.into_description(self.decryptor.as_ref())
    }

    async fn list(&self) -> Result<Vec<ConnectionDescription>> {
        let mut descriptions = Vec::new();
        for stored in self.load().await? {
            let id = stored.id.clone();
            match stored.into_description(self.decryptor.as_ref()) {
                Ok(description) => descriptions.push(description),
                Err(e) => tracing::warn!("Skipping stored connection '{}': {}", id, e),
            }
        }
        Ok(descriptions)
    }
}
