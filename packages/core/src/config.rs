//! Configuration
//!
//! Plain configuration structs passed to constructors. Both derive serde so
//! host applications can load them from their own settings files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest number of bound parameters a single statement may carry.
///
/// SQLite's compiled-in limit is 32766; staying below it leaves room for the
/// fixed parameters of each statement.
pub const DEFAULT_MAX_PARAMETERS: usize = 32_000;

/// Smallest chunk size: one closure row (three parameters) must fit in a statement
pub(crate) const MIN_CHUNK_SIZE: usize = 3;

/// Default SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Settings for opening a [`DatabaseService`](crate::db::DatabaseService)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("recordspace.db")
    }
}

/// Settings for a [`Records`](crate::services::Records) session
///
/// # Examples
///
/// ```
/// use recordspace_core::RecordsConfig;
///
/// let config = RecordsConfig::default()
///     .with_tenant("acme")
///     .with_max_parameters(500);
/// assert_eq!(config.tenant.as_deref(), Some("acme"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordsConfig {
    /// Tenant tag stamped on new records and required by every query.
    /// `None` disables tenant scoping.
    #[serde(default)]
    pub tenant: Option<String>,

    /// Chunk size for statements binding one parameter per id
    #[serde(default = "default_max_parameters")]
    pub max_parameters: usize,
}

fn default_max_parameters() -> usize {
    DEFAULT_MAX_PARAMETERS
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            tenant: None,
            max_parameters: DEFAULT_MAX_PARAMETERS,
        }
    }
}

impl RecordsConfig {
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Values below 3 are raised to 3 so a closure row always fits in a statement.
    pub fn with_max_parameters(mut self, max_parameters: usize) -> Self {
        self.max_parameters = max_parameters.max(MIN_CHUNK_SIZE);
        self
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.max_parameters.max(MIN_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_config_defaults() {
        let config = RecordsConfig::default();
        assert_eq!(config.tenant, None);
        assert_eq!(config.max_parameters, DEFAULT_MAX_PARAMETERS);
    }

    #[test]
    fn test_records_config_deserializes_partial_json() {
        let config: RecordsConfig = serde_json::from_str(r#"{"tenant":"acme"}"#).unwrap();
        assert_eq!(config.tenant.as_deref(), Some("acme"));
        assert_eq!(config.max_parameters, DEFAULT_MAX_PARAMETERS);
    }

    #[test]
    fn test_max_parameters_floor() {
        let config = RecordsConfig::default().with_max_parameters(1);
        assert_eq!(config.chunk_size(), 3);
    }

    #[test]
    fn test_database_config_default_timeout() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"path":"/tmp/x.db"}"#).unwrap();
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.path, PathBuf::from("/tmp/x.db"));
    }
}
