//! MongoDB client construction.
//!
//! # Security Features
//! - Credentials are percent-encoded into the URL and never logged
//! - The connection URL is redacted in every error message

use super::{ADMIN_DATABASE, MongoAdapter, classify_mongo_error};
use crate::Result;
use crate::config::{ConnectionDescription, SessionConfig};
use mongodb::Client;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use std::sync::atomic::AtomicBool;
use url::Url;

/// Port used when neither the host nor the description names one
pub const DEFAULT_PORT: u16 = 27017;

impl MongoAdapter {
    /// Creates a client for the description and proves the link with a ping.
    ///
    /// # Errors
    /// Returns a configuration error for unusable descriptions and a
    /// connection error when no server answers within the connect budget
    pub async fn connect(
        description: &ConnectionDescription,
        database: &str,
        config: &SessionConfig,
    ) -> Result<Self> {
        let url = connection_url(description)?;

        let mut options = ClientOptions::parse(url.as_str()).await.map_err(|e| {
            crate::error::TinyDbError::configuration(format!(
                "Failed to parse MongoDB connection options for {}: {}",
                crate::error::redact_database_url(url.as_str()),
                e
            ))
        })?;

        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);
        options.max_pool_size = Some(config.max_connections.max(1));
        options.app_name = Some(format!("tinydb-{}", env!("CARGO_PKG_VERSION")));

        let database = Some(database.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| description.default_database.clone())
            .or_else(|| options.default_database.clone());

        let client = Client::with_options(options).map_err(|e| {
            crate::error::TinyDbError::connection_failed(
                format!(
                    "Failed to create MongoDB client for {}",
                    crate::error::redact_database_url(url.as_str())
                ),
                e,
            )
        })?;

        // Client creation is lazy, so prove the server is reachable
        if let Err(e) = client
            .database(ADMIN_DATABASE)
            .run_command(doc! { "ping": 1 })
            .await
        {
            client.clone().shutdown().immediate(true).await;
            let error = classify_mongo_error("MongoDB ping failed", e);
            return Err(crate::error::TinyDbError::connection_failed(
                format!(
                    "Failed to connect to MongoDB server {}",
                    crate::error::redact_database_url(url.as_str())
                ),
                error,
            ));
        }

        tracing::debug!(
            "Opened MongoDB session for '{}' on database {:?}",
            description.label(),
            database
        );

        Ok(Self {
            client,
            database,
            closed: AtomicBool::new(false),
        })
    }
}

/// Builds the connection URL for a description.
///
/// A configured `url` wins. Otherwise the URL is assembled from host, port,
/// credentials and the description options (as query parameters).
///
/// # Example
/// ```rust
/// use tinydb_core::adapters::mongodb::connection_url;
/// use tinydb_core::config::ConnectionDescription;
/// use tinydb_core::models::DatabaseType;
///
/// let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
///     .with_host("db")
///     .with_credentials("app", Some("p@ss".to_string()))
///     .with_option("authSource", "admin");
///
/// let url = connection_url(&description).unwrap();
/// assert_eq!(url.as_str(), "mongodb://app:p%40ss@db:27017/?authSource=admin");
/// ```
pub fn connection_url(description: &ConnectionDescription) -> Result<Url> {
    if let Some(raw) = &description.url {
        let url = Url::parse(raw).map_err(|e| {
            crate::error::TinyDbError::configuration(format!(
                "Invalid MongoDB connection url {}: {}",
                crate::error::redact_database_url(raw),
                e
            ))
        })?;
        if !matches!(url.scheme(), "mongodb" | "mongodb+srv") {
            return Err(crate::error::TinyDbError::configuration(
                "Connection string must use mongodb:// or mongodb+srv:// scheme",
            ));
        }
        return Ok(url);
    }

    let (host, port) = description.host_and_port(DEFAULT_PORT).ok_or_else(|| {
        crate::error::TinyDbError::configuration("MongoDB connections require a host or url")
    })?;

    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host
    };

    let mut url = Url::parse(&format!("mongodb://{}:{}/", host, port)).map_err(|e| {
        crate::error::TinyDbError::configuration(format!("Invalid MongoDB host '{}': {}", host, e))
    })?;

    let credentials = &description.credentials;
    if credentials.has_username() {
        url.set_username(credentials.username()).map_err(|()| {
            crate::error::TinyDbError::configuration("MongoDB username cannot be set on url")
        })?;
        if let Some(password) = credentials.password().filter(|p| !p.is_empty()) {
            url.set_password(Some(password)).map_err(|()| {
                crate::error::TinyDbError::configuration("MongoDB password cannot be set on url")
            })?;
        }
    }

    if !description.options.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in &description.options {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}
