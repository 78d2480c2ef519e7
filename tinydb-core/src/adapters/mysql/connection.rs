//! MySQL connect options and version parsing.

use super::MySqlAdapter;
use crate::Result;
use crate::config::{ConnectionDescription, SessionConfig};
use crate::models::ServerVersion;
use regex::Regex;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use std::str::FromStr;
use std::sync::OnceLock;

/// Port used when neither the host nor the description names one
pub const DEFAULT_PORT: u16 = 3306;

const DEFAULT_CHARSET: &str = "utf8mb4";

impl MySqlAdapter {
    /// Opens a pooled session on `database` (or the description default).
    ///
    /// # Errors
    /// Returns a configuration error for unusable descriptions and a
    /// connection error when the server cannot be reached or rejects the
    /// credentials
    pub async fn connect(
        description: &ConnectionDescription,
        database: &str,
        config: &SessionConfig,
    ) -> Result<Self> {
        let database = resolve_database(description, database);
        let options = connect_options(description, database.as_deref())?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                crate::error::TinyDbError::connection_failed(
                    format!("Failed to connect to MySQL server {}", description),
                    e,
                )
            })?;

        tracing::debug!(
            "Opened MySQL session for '{}' on database {:?}",
            description.label(),
            database
        );

        Ok(Self { pool, database })
    }
}

/// Picks the requested database, falling back to the description default.
pub(crate) fn resolve_database(description: &ConnectionDescription, database: &str) -> Option<String> {
    Some(database.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .or_else(|| {
            description
                .default_database
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
        })
}

/// Builds connect options from a description.
///
/// A full `url` is parsed as-is; otherwise host (with optional embedded
/// port) or unix socket, credentials and the `charset` option are applied.
pub(crate) fn connect_options(
    description: &ConnectionDescription,
    database: Option<&str>,
) -> Result<MySqlConnectOptions> {
    let mut options = match &description.url {
        Some(url) => MySqlConnectOptions::from_str(url).map_err(|e| {
            crate::error::TinyDbError::configuration(format!(
                "Invalid MySQL connection url {}: {}",
                crate::error::redact_database_url(url),
                e
            ))
        })?,
        None => {
            let mut options = MySqlConnectOptions::new();
            if let Some(socket) = &description.socket {
                options = options.socket(socket);
            } else if let Some((host, port)) = description.host_and_port(DEFAULT_PORT) {
                options = options.host(&host).port(port);
            } else {
                return Err(crate::error::TinyDbError::configuration(
                    "MySQL connections require a host or socket",
                ));
            }

            let credentials = &description.credentials;
            if credentials.has_username() {
                options = options.username(credentials.username());
            }
            if let Some(password) = credentials.password().filter(|p| !p.is_empty()) {
                options = options.password(password);
            }
            options
        }
    };

    if let Some(database) = database {
        options = options.database(database);
    }

    let charset = description
        .options
        .get("charset")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CHARSET);
    options = options.charset(charset);

    Ok(options)
}

fn mariadb_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.*?)-MariaDB").ok())
        .as_ref()
}

/// Turns a `VERSION()` string into a server version.
///
/// # Example
/// ```rust
/// use tinydb_core::adapters::mysql::parse_version;
///
/// let version = parse_version("10.11.4-MariaDB-1:10.11.4+maria~ubu2204");
/// assert_eq!(version.version_text, "MariaDB 10.11.4");
///
/// let version = parse_version("8.0.36");
/// assert_eq!(version.version_text, "MySQL 8.0.36");
/// ```
pub fn parse_version(raw: &str) -> ServerVersion {
    let mariadb = mariadb_pattern()
        .and_then(|pattern| pattern.captures(raw))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string());

    let version_text = match mariadb {
        Some(release) => format!("MariaDB {}", release),
        None => format!("MySQL {}", raw),
    };

    ServerVersion {
        version: raw.to_string(),
        version_text,
    }
}
