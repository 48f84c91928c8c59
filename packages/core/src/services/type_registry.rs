//! Type Registry
//!
//! Maps schema identifiers to the small integer type ids stored on every
//! record row. Lookups are memoized for the life of the database handle;
//! entries never change once created, so the cache is never invalidated.

use crate::db::{in_transaction, Session, TransactionCoordinator};
use crate::services::error::RecordError;
use libsql::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Schema identifier to type id cache
#[derive(Debug, Default)]
pub struct TypeRegistry {
    ids: RwLock<HashMap<String, i64>>,
    schemas: RwLock<HashMap<i64, String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the type id of `schema_id`
    ///
    /// # Errors
    ///
    /// `RecordError::NotFound` when the schema is not registered and
    /// `create_if_missing` is false.
    pub async fn resolve(
        &self,
        session: &Session,
        schema_id: &str,
        create_if_missing: bool,
    ) -> Result<i64, RecordError> {
        if let Some(id) = self.ids.read().await.get(schema_id) {
            return Ok(*id);
        }

        let id = match self.lookup(session, schema_id).await? {
            Some(id) => id,
            None if create_if_missing => {
                // Inside a caller's transaction the new row may still be rolled
                // back, so it is only cached once a later lookup finds it.
                let joined = session.is_active();
                let id = self.create(session, schema_id).await?;
                if joined {
                    return Ok(id);
                }
                id
            }
            None => return Err(RecordError::not_found(schema_id)),
        };

        self.remember(schema_id, id).await;
        Ok(id)
    }

    /// Reverse lookup: schema identifier of a type id
    pub async fn schema_of(&self, session: &Session, type_id: i64) -> Result<String, RecordError> {
        if let Some(schema_id) = self.schemas.read().await.get(&type_id) {
            return Ok(schema_id.clone());
        }

        let mut rows = session
            .query(
                "SELECT schema_id FROM record_type WHERE id = ?",
                vec![Value::Integer(type_id)],
            )
            .await?;
        let schema_id = match rows.next().await? {
            Some(row) => row.get::<String>(0)?,
            None => return Err(RecordError::not_found(format!("type id {}", type_id))),
        };

        self.remember(&schema_id, type_id).await;
        Ok(schema_id)
    }

    async fn lookup(&self, session: &Session, schema_id: &str) -> Result<Option<i64>, RecordError> {
        let mut rows = session
            .query(
                "SELECT id FROM record_type WHERE schema_id = ?",
                vec![Value::Text(schema_id.to_string())],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<i64>(0)?)),
            None => Ok(None),
        }
    }

    /// Insert the type row, tolerating a concurrent insert of the same schema
    async fn create(&self, session: &Session, schema_id: &str) -> Result<i64, RecordError> {
        in_transaction(session, move || async move {
            session
                .execute(
                    "INSERT OR IGNORE INTO record_type (schema_id) VALUES (?)",
                    vec![Value::Text(schema_id.to_string())],
                )
                .await?;
            let id = self
                .lookup(session, schema_id)
                .await?
                .ok_or_else(|| RecordError::not_found(schema_id))?;
            tracing::debug!("Registered record type '{}' as {}", schema_id, id);
            Ok(id)
        })
        .await
    }

    async fn remember(&self, schema_id: &str, id: i64) {
        self.ids.write().await.insert(schema_id.to_string(), id);
        self.schemas.write().await.insert(id, schema_id.to_string());
    }
}
