//! Index Engine
//!
//! Maintains one typed `record_index` row per (index key, record, field) for
//! every registered field with a non-null value. Updating a record deletes
//! its previous row before inserting the new one, so a field never carries two
//! values under one key.

use crate::db::{placeholders, Session};
use crate::models::{Record, RecordId, Schema, Value, ValueKind};
use crate::services::error::RecordError;

/// Per-field typed index maintenance
#[derive(Clone)]
pub struct IndexEngine {
    session: Session,
}

impl IndexEngine {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Rewrite the index rows of `record`
    ///
    /// With `is_new` the delete step is skipped: a record that was just
    /// inserted cannot have rows yet.
    pub async fn reindex<R: Record>(
        &self,
        schema: &Schema<R>,
        record: &R,
        id: RecordId,
        is_new: bool,
    ) -> Result<(), RecordError> {
        for field in schema.fields() {
            if !is_new {
                self.session
                    .execute(
                        "DELETE FROM record_index
                         WHERE index_key = ? AND record_id = ? AND field_name = ?",
                        vec![
                            libsql::Value::Text(field.index_key().to_string()),
                            libsql::Value::Integer(id.get()),
                            libsql::Value::Text(field.name().to_string()),
                        ],
                    )
                    .await?;
            }

            let Some(value) = field.read(record) else {
                continue;
            };

            let sql = format!(
                "INSERT INTO record_index (index_key, record_id, field_name, {})
                 VALUES (?, ?, ?, ?)",
                value.kind().column()
            );
            self.session
                .execute(
                    &sql,
                    vec![
                        libsql::Value::Text(field.index_key().to_string()),
                        libsql::Value::Integer(id.get()),
                        libsql::Value::Text(field.name().to_string()),
                        value.to_sql(),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Distinct values stored under `index_key`, ascending
    ///
    /// The text column is tried first, then numeric, then timestamp; the first
    /// non-empty column wins.
    pub async fn index_list(&self, index_key: &str) -> Result<Vec<Value>, RecordError> {
        for kind in [ValueKind::Text, ValueKind::Numeric, ValueKind::Timestamp] {
            let column = kind.column();
            let sql = format!(
                "SELECT DISTINCT {column} FROM record_index
                 WHERE index_key = ? AND {column} IS NOT NULL
                 ORDER BY {column} ASC"
            );
            let mut rows = self
                .session
                .query(&sql, vec![libsql::Value::Text(index_key.to_string())])
                .await?;

            let mut values = Vec::new();
            while let Some(row) = rows.next().await? {
                if let Some(value) = Value::from_sql(kind, row.get_value(0)?) {
                    values.push(value);
                }
            }
            if !values.is_empty() {
                return Ok(values);
            }
        }
        Ok(Vec::new())
    }

    /// Drop every index row of the given records
    pub(crate) async fn remove_records(&self, ids: &[i64]) -> Result<u64, RecordError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM record_index WHERE record_id IN ({})",
            placeholders(ids.len())
        );
        let params = ids.iter().map(|id| libsql::Value::Integer(*id)).collect();
        Ok(self.session.execute(&sql, params).await?)
    }
}
