//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, statement and transaction failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers connection, filesystem and statement failures. Record-level
/// failures (unknown schemas, access violations) are handled by the
/// service-layer [`RecordError`](crate::services::RecordError).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// BEGIN, COMMIT or ROLLBACK failed
    #[error("Transaction {action} failed: {source}")]
    TransactionFailed {
        action: &'static str,
        source: libsql::Error,
    },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a transaction control error
    pub fn transaction_failed(action: &'static str, source: libsql::Error) -> Self {
        Self::TransactionFailed { action, source }
    }

    /// Whether this error came from the transaction coordinator itself
    pub fn is_transaction_failure(&self) -> bool {
        matches!(self, Self::TransactionFailed { .. })
    }
}
