//! Record Store
//!
//! Persists, loads, clones and removes record rows. Saving writes the
//! serialized payload and then refreshes the record's index rows; removal
//! deletes the record together with everything that references it (links,
//! closure rows, index rows) in chunks sized to the engine's parameter limit.
//!
//! Every operation runs in one transaction, joining the caller's when one is
//! active.

use crate::config::MIN_CHUNK_SIZE;
use crate::db::{in_transaction, placeholders, Session};
use crate::models::{Identity, Record, RecordId, RecordMeta, Schema, SchemaRegistry};
use crate::services::error::RecordError;
use crate::services::hierarchy_engine::HierarchyEngine;
use crate::services::index_engine::IndexEngine;
use crate::services::link_engine::LinkEngine;
use crate::services::serializer::Serializer;
use crate::services::type_registry::TypeRegistry;
use std::sync::Arc;

/// Record persistence plus the engines that hang off record identity
pub struct RecordStore<S> {
    session: Session,
    types: Arc<TypeRegistry>,
    schemas: Arc<SchemaRegistry>,
    serializer: S,
    tenant: Option<String>,
    chunk_size: usize,
    index: IndexEngine,
    links: LinkEngine,
    hierarchy: HierarchyEngine,
}

impl<S: Serializer> RecordStore<S> {
    pub fn new(
        session: Session,
        types: Arc<TypeRegistry>,
        schemas: Arc<SchemaRegistry>,
        serializer: S,
        tenant: Option<String>,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        Self {
            index: IndexEngine::new(session.clone()),
            links: LinkEngine::new(session.clone(), chunk_size),
            hierarchy: HierarchyEngine::new(session.clone(), chunk_size),
            session,
            types,
            schemas,
            serializer,
            tenant,
            chunk_size,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn index(&self) -> &IndexEngine {
        &self.index
    }

    pub fn links(&self) -> &LinkEngine {
        &self.links
    }

    pub fn hierarchy(&self) -> &HierarchyEngine {
        &self.hierarchy
    }

    pub(crate) fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub(crate) async fn schema<R: Record>(&self) -> Result<Arc<Schema<R>>, RecordError> {
        Ok(self.schemas.get::<R>().await?)
    }

    /// Insert new records and update persisted ones
    ///
    /// New records receive their identity as they are inserted. Records that
    /// were removed cannot be saved again.
    pub async fn save<'r, R, I>(&self, records: I) -> Result<(), RecordError>
    where
        R: Record,
        I: IntoIterator<Item = &'r mut R>,
    {
        let schema = self.schema::<R>().await?;
        let type_id = self.types.resolve(&self.session, R::SCHEMA_ID, true).await?;

        in_transaction(&self.session, move || async move {
            for record in records {
                self.save_one(&schema, type_id, record).await?;
            }
            Ok(())
        })
        .await
    }

    async fn save_one<R: Record>(
        &self,
        schema: &Schema<R>,
        type_id: i64,
        record: &mut R,
    ) -> Result<(), RecordError> {
        let payload = self.serializer.encode(&*record)?;
        let blob = blob_param(record.meta());

        match record.meta().identity() {
            Identity::Removed => Err(RecordError::illegal_state(format!(
                "cannot save a removed '{}' record",
                R::SCHEMA_ID
            ))),
            Identity::New => {
                self.session
                    .execute(
                        "INSERT INTO record (type_id, tenant, payload, blob) VALUES (?, ?, ?, ?)",
                        vec![
                            libsql::Value::Integer(type_id),
                            tenant_param(self.tenant.as_deref()),
                            libsql::Value::Text(payload),
                            blob.unwrap_or(libsql::Value::Null),
                        ],
                    )
                    .await?;
                let id = RecordId(self.session.last_insert_rowid());
                record.meta_mut().assign(id);

                self.index.reindex(schema, record, id, true).await?;
                tracing::debug!("Created record {} ({})", id, R::SCHEMA_ID);
                Ok(())
            }
            Identity::Persisted(id) => {
                let updated = match blob {
                    Some(blob) => {
                        self.session
                            .execute(
                                "UPDATE record SET payload = ?, blob = ? WHERE id = ?",
                                vec![
                                    libsql::Value::Text(payload),
                                    blob,
                                    libsql::Value::Integer(id.get()),
                                ],
                            )
                            .await?
                    }
                    None => {
                        self.session
                            .execute(
                                "UPDATE record SET payload = ? WHERE id = ?",
                                vec![
                                    libsql::Value::Text(payload),
                                    libsql::Value::Integer(id.get()),
                                ],
                            )
                            .await?
                    }
                };
                if updated == 0 {
                    return Err(RecordError::RecordNotFound { id });
                }

                self.index.reindex(schema, record, id, false).await?;
                tracing::debug!("Updated record {} ({})", id, R::SCHEMA_ID);
                Ok(())
            }
        }
    }

    /// Delete records and every row that references them
    ///
    /// Ids are processed in chunks of at most `max_parameters`, all inside one
    /// transaction. Only after the transaction commits are the in-memory
    /// records marked as removed.
    pub async fn remove<'r, R, I>(&self, records: I) -> Result<(), RecordError>
    where
        R: Record,
        I: IntoIterator<Item = &'r mut R>,
    {
        let mut targets: Vec<&mut R> = records
            .into_iter()
            .filter(|record| record.id().is_some())
            .collect();
        let ids: Vec<i64> = targets
            .iter()
            .filter_map(|record| record.id())
            .map(RecordId::get)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        in_transaction(&self.session, || self.remove_ids(&ids)).await?;

        for record in targets.iter_mut() {
            record.meta_mut().invalidate();
        }
        tracing::debug!("Removed {} {} record(s)", ids.len(), R::SCHEMA_ID);
        Ok(())
    }

    async fn remove_ids(&self, ids: &[i64]) -> Result<(), RecordError> {
        for chunk in ids.chunks(self.chunk_size) {
            let links = self.links.remove_records(chunk).await?;
            let paths = self.hierarchy.remove_records(chunk).await?;
            let indexes = self.index.remove_records(chunk).await?;

            let params = chunk.iter().map(|id| libsql::Value::Integer(*id)).collect();
            let records = self
                .session
                .execute(
                    &format!("DELETE FROM record WHERE id IN ({})", placeholders(chunk.len())),
                    params,
                )
                .await?;

            tracing::trace!(
                "Removed chunk: {} record(s), {} link(s), {} path(s), {} index row(s)",
                records,
                links,
                paths,
                indexes
            );
        }
        Ok(())
    }

    /// Copy records into new rows
    ///
    /// Sources are saved first. Payload, blob, type and tenant are copied and
    /// the copies are indexed; links and hierarchy edges are not copied.
    pub async fn clone_records<R: Record>(&self, records: &mut [R]) -> Result<Vec<R>, RecordError> {
        let schema = self.schema::<R>().await?;

        in_transaction(&self.session, move || async move {
            self.save(records.iter_mut()).await?;

            let mut clones = Vec::with_capacity(records.len());
            for source in records.iter() {
                let Some(source_id) = source.id() else {
                    continue;
                };
                self.session
                    .execute(
                        "INSERT INTO record (type_id, tenant, payload, blob)
                         SELECT type_id, tenant, payload, blob FROM record WHERE id = ?",
                        vec![libsql::Value::Integer(source_id.get())],
                    )
                    .await?;
                let clone_id = RecordId(self.session.last_insert_rowid());

                let clone: R = self
                    .load(clone_id)
                    .await?
                    .map(|(_, payload, blob)| self.hydrate(clone_id, &payload, blob))
                    .transpose()?
                    .ok_or(RecordError::RecordNotFound { id: clone_id })?;

                self.index.reindex(&schema, &clone, clone_id, true).await?;
                tracing::debug!("Cloned record {} into {}", source_id, clone_id);
                clones.push(clone);
            }
            Ok(clones)
        })
        .await
    }

    /// Load a record by id
    ///
    /// Returns `Ok(None)` when no row exists (or it belongs to another
    /// tenant) and `RecordError::Access` when the row is of another type.
    pub async fn find<R: Record>(&self, id: RecordId) -> Result<Option<R>, RecordError> {
        let Some((type_id, payload, blob)) = self.load(id).await? else {
            return Ok(None);
        };

        let actual = self.types.schema_of(&self.session, type_id).await?;
        if actual != R::SCHEMA_ID {
            return Err(RecordError::access(id, R::SCHEMA_ID, actual));
        }

        self.hydrate(id, &payload, blob).map(Some)
    }

    /// Schema identifier of a stored record
    pub async fn record_schema(&self, id: RecordId) -> Result<Option<String>, RecordError> {
        match self.load(id).await? {
            Some((type_id, _, _)) => Ok(Some(self.types.schema_of(&self.session, type_id).await?)),
            None => Ok(None),
        }
    }

    /// Decode a stored row into a record with fresh metadata
    pub(crate) fn hydrate<R: Record>(
        &self,
        id: RecordId,
        payload: &str,
        blob: Option<Vec<u8>>,
    ) -> Result<R, RecordError> {
        let mut record: R = self.serializer.decode(payload)?;
        *record.meta_mut() = RecordMeta::loaded(id, blob);
        Ok(record)
    }

    async fn load(
        &self,
        id: RecordId,
    ) -> Result<Option<(i64, String, Option<Vec<u8>>)>, RecordError> {
        let (sql, params) = match self.tenant.as_deref() {
            Some(tenant) => (
                "SELECT type_id, payload, blob FROM record WHERE id = ? AND tenant = ?",
                vec![
                    libsql::Value::Integer(id.get()),
                    libsql::Value::Text(tenant.to_string()),
                ],
            ),
            None => (
                "SELECT type_id, payload, blob FROM record WHERE id = ?",
                vec![libsql::Value::Integer(id.get())],
            ),
        };

        let mut rows = self.session.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some((
                row.get::<i64>(0)?,
                row.get::<String>(1)?,
                row.get::<Option<Vec<u8>>>(2)?,
            ))),
            None => Ok(None),
        }
    }
}

/// Blob parameter, present only when the record's blob was changed
fn blob_param(meta: &RecordMeta) -> Option<libsql::Value> {
    if !meta.blob_changed() {
        return None;
    }
    Some(match meta.blob() {
        Some(bytes) => libsql::Value::Blob(bytes.to_vec()),
        None => libsql::Value::Null,
    })
}

fn tenant_param(tenant: Option<&str>) -> libsql::Value {
    match tenant {
        Some(tenant) => libsql::Value::Text(tenant.to_string()),
        None => libsql::Value::Null,
    }
}
