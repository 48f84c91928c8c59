//! Service Layer Error Types
//!
//! This module defines the errors returned by [`Records`](super::Records)
//! and the engines behind it.

use crate::db::DatabaseError;
use crate::models::{RecordId, SchemaError};
use thiserror::Error;

/// Record operation errors
#[derive(Error, Debug)]
pub enum RecordError {
    /// Schema identifier is not registered and creation was not allowed
    #[error("Record type not registered: {schema_id}")]
    NotFound { schema_id: String },

    /// Record exists but belongs to another schema
    #[error("Record {id} is a '{actual}', not a '{expected}'")]
    Access {
        id: RecordId,
        expected: String,
        actual: String,
    },

    /// Update of an id with no stored row
    #[error("Record not found: {id}")]
    RecordNotFound { id: RecordId },

    /// Transaction could not be opened or committed
    #[error("Transaction failed: {0}")]
    Transaction(#[source] DatabaseError),

    /// Misuse detected at runtime: malformed field metadata, unknown indexed
    /// field, query built out of order, record without identity
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[source] DatabaseError),
}

impl RecordError {
    /// Create a schema not found error
    pub fn not_found(schema_id: impl Into<String>) -> Self {
        Self::NotFound {
            schema_id: schema_id.into(),
        }
    }

    /// Create an access error for a record of the wrong schema
    pub fn access(id: RecordId, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Access {
            id,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Error for an operation on a record that was never saved
    pub fn missing_identity(context: &str) -> Self {
        Self::IllegalState(format!("{}: record has no identity, save it first", context))
    }
}

impl From<DatabaseError> for RecordError {
    fn from(error: DatabaseError) -> Self {
        if error.is_transaction_failure() {
            Self::Transaction(error)
        } else {
            Self::Database(error)
        }
    }
}

impl From<libsql::Error> for RecordError {
    fn from(error: libsql::Error) -> Self {
        Self::Database(DatabaseError::LibsqlError(error))
    }
}

impl From<SchemaError> for RecordError {
    fn from(error: SchemaError) -> Self {
        Self::IllegalState(error.to_string())
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
