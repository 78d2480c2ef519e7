//! Resolved connection descriptions.
//!
//! A `ConnectionDescription` is what the connection store hands to the
//! session registry: the engine kind, addressing fields and decrypted
//! credentials needed to open one driver session.

use crate::models::DatabaseType;
use crate::security::Credentials;
use std::collections::BTreeMap;

/// Everything needed to open a driver session for one stored connection.
///
/// # Security
/// `Display` and `Debug` never include the password, and the `url` field is
/// redacted before it is printed.
///
/// # Example
/// ```rust
/// use tinydb_core::config::ConnectionDescription;
/// use tinydb_core::models::DatabaseType;
///
/// let description = ConnectionDescription::new("c1", DatabaseType::MySQL)
///     .with_host("db.internal:3307")
///     .with_credentials("admin", Some("secret".to_string()));
///
/// assert!(description.validate().is_ok());
/// assert_eq!(description.host_and_port(3306), Some(("db.internal".to_string(), 3307)));
/// ```
#[derive(Clone)]
pub struct ConnectionDescription {
    /// Stored connection id
    pub id: String,
    /// Engine kind, selects driver and analyzer
    pub engine: DatabaseType,
    /// Optional label shown to users
    pub display_name: Option<String>,
    /// Host name, optionally with `:port`
    pub host: Option<String>,
    /// Explicit port, overrides a port embedded in `host`
    pub port: Option<u16>,
    /// Unix socket path (MySQL)
    pub socket: Option<String>,
    /// Database used when the caller does not name one
    pub default_database: Option<String>,
    /// Database file (SQLite)
    pub file_path: Option<String>,
    /// Complete connection URL, used as-is when present
    pub url: Option<String>,
    /// Free-form driver options
    pub options: BTreeMap<String, String>,
    /// Decrypted credentials
    pub credentials: Credentials,
}

impl ConnectionDescription {
    /// Creates a description with no addressing fields set.
    pub fn new(id: impl Into<String>, engine: DatabaseType) -> Self {
        Self {
            id: id.into(),
            engine,
            display_name: None,
            host: None,
            port: None,
            socket: None,
            default_database: None,
            file_path: None,
            url: None,
            options: BTreeMap::new(),
            credentials: Credentials::default(),
        }
    }

    /// Builder method to set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Builder method to set host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set the unix socket path.
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    /// Builder method to set the default database.
    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = Some(database.into());
        self
    }

    /// Builder method to set the SQLite database file.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Builder method to set a full connection URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Builder method to add a driver option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Credentials::new(username.into(), password);
        self
    }

    /// Splits `host` into host name and port.
    ///
    /// An explicit `port` wins over a port embedded in `host`; otherwise
    /// `default_port` is used. Returns `None` when no host is configured.
    pub fn host_and_port(&self, default_port: u16) -> Option<(String, u16)> {
        let raw = self.host.as_deref().map(str::trim).filter(|h| !h.is_empty())?;

        let (name, embedded) = match raw.rsplit_once(':') {
            // Bracketed IPv6 with port, or plain host:port
            Some((name, port)) if !name.contains(':') || name.ends_with(']') => {
                match port.parse::<u16>() {
                    Ok(port) => (name.trim_matches(['[', ']']).to_string(), Some(port)),
                    Err(_) => (raw.to_string(), None),
                }
            }
            _ => (raw.trim_matches(['[', ']']).to_string(), None),
        };

        let port = self.port.or(embedded).unwrap_or(default_port);
        Some((name, port))
    }

    /// Validates engine-specific required fields.
    ///
    /// # Errors
    /// Returns a configuration error naming the missing field
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(crate::error::TinyDbError::configuration(
                "connection id cannot be empty",
            ));
        }

        if let Some(0) = self.port {
            return Err(crate::error::TinyDbError::configuration(
                "port must be greater than 0",
            ));
        }

        if self.url.is_some() {
            return Ok(());
        }

        match self.engine {
            DatabaseType::MySQL => {
                if !self.credentials.has_username() {
                    return Err(crate::error::TinyDbError::configuration(
                        "MySQL connections require a username",
                    ));
                }
                if self.host_and_port(3306).is_none() && self.socket.is_none() {
                    return Err(crate::error::TinyDbError::configuration(
                        "MySQL connections require a host or socket",
                    ));
                }
            }
            DatabaseType::MongoDB => {
                if self.host_and_port(27017).is_none() {
                    return Err(crate::error::TinyDbError::configuration(
                        "MongoDB connections require a host or url",
                    ));
                }
            }
            DatabaseType::SQLite => {
                if self.file_path.as_deref().is_none_or(|p| p.trim().is_empty()) {
                    return Err(crate::error::TinyDbError::configuration(
                        "SQLite connections require a database file",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Label for logs: display name if present, else the id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

impl std::fmt::Display for ConnectionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.engine)?;
        if let Some(url) = &self.url {
            write!(f, "{}", crate::error::redact_database_url(url))?;
        } else if let Some(path) = &self.file_path {
            write!(f, "{}", path)?;
        } else if let Some(socket) = &self.socket {
            write!(f, "unix:{}", socket)?;
        } else if let Some(host) = &self.host {
            write!(f, "{}", host)?;
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
        }
        // Intentionally omit username and never include credentials
        write!(f, ")")
    }
}

impl std::fmt::Debug for ConnectionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescription")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("display_name", &self.display_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("default_database", &self.default_database)
            .field("file_path", &self.file_path)
            .field("url", &self.url.as_deref().map(crate::error::redact_database_url))
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_port_defaults() {
        let description = ConnectionDescription::new("c1", DatabaseType::MySQL).with_host("db");
        assert_eq!(description.host_and_port(3306), Some(("db".to_string(), 3306)));
    }

    #[test]
    fn test_host_and_port_embedded() {
        let description =
            ConnectionDescription::new("c1", DatabaseType::MySQL).with_host("db:3307");
        assert_eq!(description.host_and_port(3306), Some(("db".to_string(), 3307)));
    }

    #[test]
    fn test_host_and_port_explicit_port_wins() {
        let description = ConnectionDescription::new("c1", DatabaseType::MySQL)
            .with_host("db:3307")
            .with_port(3310);
        assert_eq!(description.host_and_port(3306), Some(("db".to_string(), 3310)));
    }

    #[test]
    fn test_host_and_port_ipv6() {
        let description =
            ConnectionDescription::new("c1", DatabaseType::MongoDB).with_host("[::1]:27018");
        assert_eq!(description.host_and_port(27017), Some(("::1".to_string(), 27018)));

        let description =
            ConnectionDescription::new("c1", DatabaseType::MongoDB).with_host("::1");
        assert_eq!(description.host_and_port(27017), Some(("::1".to_string(), 27017)));
    }

    #[test]
    fn test_host_and_port_missing() {
        let description = ConnectionDescription::new("c1", DatabaseType::MySQL).with_host("  ");
        assert_eq!(description.host_and_port(3306), None);
    }

    #[test]
    fn test_validate_mysql() {
        let description = ConnectionDescription::new("c1", DatabaseType::MySQL).with_host("db");
        assert!(description.validate().is_err(), "username is required");

        let description = description.with_credentials("root", None);
        assert!(description.validate().is_ok());

        let description = ConnectionDescription::new("c1", DatabaseType::MySQL)
            .with_socket("/var/run/mysqld.sock")
            .with_credentials("root", None);
        assert!(description.validate().is_ok());
    }

    #[test]
    fn test_validate_sqlite_and_mongo() {
        assert!(ConnectionDescription::new("c1", DatabaseType::SQLite).validate().is_err());
        assert!(
            ConnectionDescription::new("c1", DatabaseType::SQLite)
                .with_file("/tmp/app.db")
                .validate()
                .is_ok()
        );
        assert!(ConnectionDescription::new("c1", DatabaseType::MongoDB).validate().is_err());
        assert!(
            ConnectionDescription::new("c1", DatabaseType::MongoDB)
                .with_url("mongodb://localhost")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_zero_port_and_empty_id() {
        let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
            .with_host("db")
            .with_port(0);
        assert!(description.validate().is_err());

        let description = ConnectionDescription::new(" ", DatabaseType::SQLite).with_file("a.db");
        assert!(description.validate().is_err());
    }

    #[test]
    fn test_display_and_debug_hide_credentials() {
        let description = ConnectionDescription::new("c1", DatabaseType::MongoDB)
            .with_url("mongodb://admin:topsecret@db:27017")
            .with_credentials("admin", Some("topsecret".to_string()));

        let display = format!("{}", description);
        let debug = format!("{:?}", description);

        assert!(display.contains("db:27017"));
        assert!(!display.contains("topsecret"));
        assert!(!debug.contains("topsecret"));
    }
}
