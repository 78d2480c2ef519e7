//! Session manager tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time budgets and bounds applied to every session the registry opens.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use tinydb_core::config::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_query_timeout(Duration::from_secs(5))
///     .with_max_rows(250);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Budget for opening the driver session
    pub connect_timeout: Duration,
    /// Budget for one structure analysis pass
    pub analysis_timeout: Duration,
    /// Budget for one routed request round trip
    pub query_timeout: Duration,
    /// Row bound applied to query results and collection pages
    pub max_rows: u32,
    /// Pool size for SQL drivers
    pub max_connections: u32,
    /// Buffer size of the change notification channel
    pub notification_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(30),
            max_rows: 1000,
            max_connections: 1,
            notification_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Validates session configuration parameters.
    ///
    /// # Errors
    /// Returns error if a budget is zero or a bound is out of range
    pub fn validate(&self) -> crate::Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(crate::error::TinyDbError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.analysis_timeout.is_zero() {
            return Err(crate::error::TinyDbError::configuration(
                "analysis_timeout must be greater than 0",
            ));
        }

        if self.query_timeout.is_zero() {
            return Err(crate::error::TinyDbError::configuration(
                "query_timeout must be greater than 0",
            ));
        }

        if self.max_rows == 0 {
            return Err(crate::error::TinyDbError::configuration(
                "max_rows must be greater than 0",
            ));
        }

        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(crate::error::TinyDbError::configuration(
                "max_connections must be between 1 and 100",
            ));
        }

        if self.notification_capacity == 0 {
            return Err(crate::error::TinyDbError::configuration(
                "notification_capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to set the connect budget.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the analysis budget.
    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    /// Builder method to set the query budget.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Builder method to set the row bound.
    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Builder method to set the SQL pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder method to set the notification buffer size.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }
}
