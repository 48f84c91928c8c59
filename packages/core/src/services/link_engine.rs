//! Link Engine
//!
//! Associations between records are symmetric: linking A to B writes the rows
//! (A, B) and (B, A) with the same optional attribute, and every update or
//! removal touches both rows. Re-linking an existing pair only replaces the
//! attribute, so the row count stays at two.

use crate::config::MIN_CHUNK_SIZE;
use crate::db::{in_transaction, placeholders, Session};
use crate::models::{RecordId, Value, ValueKind};
use crate::services::error::RecordError;
use std::collections::{BTreeSet, HashSet};

const LINK_COLUMNS: usize = 5;

/// Symmetric association maintenance
#[derive(Clone)]
pub struct LinkEngine {
    session: Session,
    chunk_size: usize,
}

impl LinkEngine {
    /// `chunk_size` below 3 is raised to 3
    pub fn new(session: Session, chunk_size: usize) -> Self {
        Self {
            session,
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    /// Link `reference` to every target, replacing the attribute of pairs
    /// that are already linked
    pub async fn link(
        &self,
        reference: RecordId,
        targets: &[RecordId],
        attribute: Option<&Value>,
    ) -> Result<(), RecordError> {
        let targets: Vec<RecordId> = targets
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        in_transaction(&self.session, move || async move {
            let existing = self.linked_targets(reference, &targets).await?;

            for target in targets.iter().filter(|t| existing.contains(*t)) {
                self.update_attribute(reference, *target, attribute).await?;
            }

            let fresh: Vec<RecordId> = targets
                .iter()
                .copied()
                .filter(|t| !existing.contains(t))
                .collect();
            self.insert_pairs(reference, &fresh, attribute).await?;

            tracing::debug!(
                "Linked record {} to {} target(s) ({} new)",
                reference,
                targets.len(),
                fresh.len()
            );
            Ok(())
        })
        .await
    }

    /// Remove both mirrored rows of every (reference, target) pair
    pub async fn unlink(
        &self,
        reference: RecordId,
        targets: &[RecordId],
    ) -> Result<(), RecordError> {
        if targets.is_empty() {
            return Ok(());
        }

        in_transaction(&self.session, move || async move {
            let mut removed = 0;
            for chunk in targets.chunks(self.chunk_size - 1) {
                let list = placeholders(chunk.len());
                let mut params = vec![libsql::Value::Integer(reference.get())];
                params.extend(chunk.iter().map(|t| libsql::Value::Integer(t.get())));

                removed += self
                    .session
                    .execute(
                        &format!(
                            "DELETE FROM record_link WHERE reference_id = ? AND target_id IN ({})",
                            list
                        ),
                        params.clone(),
                    )
                    .await?;
                removed += self
                    .session
                    .execute(
                        &format!(
                            "DELETE FROM record_link WHERE target_id = ? AND reference_id IN ({})",
                            list
                        ),
                        params,
                    )
                    .await?;
            }
            tracing::debug!("Unlinked record {} ({} row(s) removed)", reference, removed);
            Ok(())
        })
        .await
    }

    /// Attribute stored on the (reference, target) link
    ///
    /// `None` both for unlinked pairs and for links without an attribute.
    pub async fn attribute(
        &self,
        reference: RecordId,
        target: RecordId,
    ) -> Result<Option<Value>, RecordError> {
        let mut rows = self
            .session
            .query(
                "SELECT text_value, numeric_value, timestamp_value FROM record_link
                 WHERE reference_id = ? AND target_id = ?",
                vec![
                    libsql::Value::Integer(reference.get()),
                    libsql::Value::Integer(target.get()),
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Value::from_columns(
                row.get_value(0)?,
                row.get_value(1)?,
                row.get_value(2)?,
            )),
            None => Ok(None),
        }
    }

    pub async fn is_linked(
        &self,
        reference: RecordId,
        target: RecordId,
    ) -> Result<bool, RecordError> {
        let mut rows = self
            .session
            .query(
                "SELECT 1 FROM record_link WHERE reference_id = ? AND target_id = ?",
                vec![
                    libsql::Value::Integer(reference.get()),
                    libsql::Value::Integer(target.get()),
                ],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Drop every link touching the given records, in both directions
    pub(crate) async fn remove_records(&self, ids: &[i64]) -> Result<u64, RecordError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let list = placeholders(ids.len());
        let params: Vec<libsql::Value> = ids.iter().map(|id| libsql::Value::Integer(*id)).collect();

        let outgoing = self
            .session
            .execute(
                &format!("DELETE FROM record_link WHERE reference_id IN ({})", list),
                params.clone(),
            )
            .await?;
        let incoming = self
            .session
            .execute(
                &format!("DELETE FROM record_link WHERE target_id IN ({})", list),
                params,
            )
            .await?;
        Ok(outgoing + incoming)
    }

    async fn linked_targets(
        &self,
        reference: RecordId,
        targets: &[RecordId],
    ) -> Result<HashSet<RecordId>, RecordError> {
        let mut existing = HashSet::new();
        for chunk in targets.chunks(self.chunk_size - 1) {
            let mut params = vec![libsql::Value::Integer(reference.get())];
            params.extend(chunk.iter().map(|t| libsql::Value::Integer(t.get())));

            let ids = self
                .session
                .query_ids(
                    &format!(
                        "SELECT target_id FROM record_link
                         WHERE reference_id = ? AND target_id IN ({})",
                        placeholders(chunk.len())
                    ),
                    params,
                )
                .await?;
            existing.extend(ids.into_iter().map(RecordId));
        }
        Ok(existing)
    }

    async fn update_attribute(
        &self,
        reference: RecordId,
        target: RecordId,
        attribute: Option<&Value>,
    ) -> Result<(), RecordError> {
        let mut params = attribute_columns(attribute).to_vec();
        params.extend([
            libsql::Value::Integer(reference.get()),
            libsql::Value::Integer(target.get()),
            libsql::Value::Integer(target.get()),
            libsql::Value::Integer(reference.get()),
        ]);
        self.session
            .execute(
                "UPDATE record_link SET text_value = ?, numeric_value = ?, timestamp_value = ?
                 WHERE (reference_id = ? AND target_id = ?)
                    OR (reference_id = ? AND target_id = ?)",
                params,
            )
            .await?;
        Ok(())
    }

    /// Insert both mirrored rows per target, batched under the parameter limit
    async fn insert_pairs(
        &self,
        reference: RecordId,
        targets: &[RecordId],
        attribute: Option<&Value>,
    ) -> Result<(), RecordError> {
        let columns = attribute_columns(attribute);
        let mut rows: Vec<(RecordId, RecordId)> = Vec::with_capacity(targets.len() * 2);
        for target in targets {
            rows.push((reference, *target));
            if *target != reference {
                rows.push((*target, reference));
            }
        }

        let rows_per_statement = (self.chunk_size / LINK_COLUMNS).max(1);
        for batch in rows.chunks(rows_per_statement) {
            let values = vec!["(?, ?, ?, ?, ?)"; batch.len()].join(", ");
            let mut params = Vec::with_capacity(batch.len() * LINK_COLUMNS);
            for (from, to) in batch {
                params.push(libsql::Value::Integer(from.get()));
                params.push(libsql::Value::Integer(to.get()));
                params.extend(columns.iter().cloned());
            }
            self.session
                .execute(
                    &format!(
                        "INSERT INTO record_link
                         (reference_id, target_id, text_value, numeric_value, timestamp_value)
                         VALUES {}",
                        values
                    ),
                    params,
                )
                .await?;
        }
        Ok(())
    }
}

/// Flatten an optional attribute into the (text, numeric, timestamp) columns
fn attribute_columns(attribute: Option<&Value>) -> [libsql::Value; 3] {
    let mut columns = [libsql::Value::Null, libsql::Value::Null, libsql::Value::Null];
    if let Some(value) = attribute {
        let slot = match value.kind() {
            ValueKind::Text => 0,
            ValueKind::Numeric => 1,
            ValueKind::Timestamp => 2,
        };
        columns[slot] = value.to_sql();
    }
    columns
}
