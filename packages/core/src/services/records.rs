//! Records Facade
//!
//! [`Records`] is the entry point for applications: one session (connection
//! plus transaction state) bound to an optional tenant, exposing persistence,
//! links, hierarchy edits, index listing and queries.
//!
//! Every mutating call is one unit of work. Use [`Records::transaction`] to
//! group several calls; calls made inside it join the open transaction and
//! commit or roll back together.
//!
//! # Examples
//!
//! ```no_run
//! # use recordspace_core::{DatabaseService, Records, RecordsConfig, Record, RecordMeta};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize, Deserialize, Default)]
//! # struct Folder { #[serde(skip)] meta: RecordMeta, name: String }
//! # impl Record for Folder {
//! #     const SCHEMA_ID: &'static str = "demo.Folder";
//! #     fn meta(&self) -> &RecordMeta { &self.meta }
//! #     fn meta_mut(&mut self) -> &mut RecordMeta { &mut self.meta }
//! # }
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseService::new("./data/records.db".into()).await?;
//! let records = Records::new(&db, RecordsConfig::default().with_tenant("acme")).await?;
//!
//! let mut root = Folder { name: "root".into(), ..Default::default() };
//! let mut docs = Folder { name: "docs".into(), ..Default::default() };
//! records.save([&mut root, &mut docs]).await?;
//! records.add_edge(&root, &docs).await?;
//!
//! let below_root = records.query::<Folder>().below(&[&root]).get_list().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RecordsConfig;
use crate::db::{in_transaction, DatabaseService, Session};
use crate::models::{Identified, Record, RecordId, ToValue, Value};
use crate::services::error::RecordError;
use crate::services::query::Query;
use crate::services::record_store::RecordStore;
use crate::services::serializer::{JsonSerializer, Serializer};
use std::future::Future;

/// Record persistence session
pub struct Records<S: Serializer = JsonSerializer> {
    store: RecordStore<S>,
}

impl Records<JsonSerializer> {
    /// Open a session storing payloads as JSON
    pub async fn new(db: &DatabaseService, config: RecordsConfig) -> Result<Self, RecordError> {
        Self::with_serializer(db, config, JsonSerializer).await
    }
}

impl<S: Serializer> Records<S> {
    /// Open a session with a custom payload serializer
    pub async fn with_serializer(
        db: &DatabaseService,
        config: RecordsConfig,
        serializer: S,
    ) -> Result<Self, RecordError> {
        let session = db.session().await?;
        let chunk_size = config.chunk_size();
        tracing::debug!(
            "Opened records session (tenant: {:?}, max parameters: {})",
            config.tenant,
            chunk_size
        );

        Ok(Self {
            store: RecordStore::new(
                session,
                db.type_registry().clone(),
                db.schemas().clone(),
                serializer,
                config.tenant,
                chunk_size,
            ),
        })
    }

    pub fn session(&self) -> &Session {
        self.store.session()
    }

    pub fn tenant(&self) -> Option<&str> {
        self.store.tenant()
    }

    /// Run `work` as one unit of work
    ///
    /// Nested record calls join the transaction. Any error rolls back every
    /// write made inside `work` and is returned unchanged.
    pub async fn transaction<T, F, Fut>(&self, work: F) -> Result<T, RecordError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RecordError>>,
    {
        in_transaction(self.store.session(), work).await
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Insert new records and update persisted ones in one transaction
    pub async fn save<'r, R, I>(&self, records: I) -> Result<(), RecordError>
    where
        R: Record,
        I: IntoIterator<Item = &'r mut R>,
    {
        self.store.save(records).await
    }

    /// Delete records with their index rows, links and hierarchy edges
    ///
    /// Records without an identity are skipped. Removed records cannot be
    /// saved again.
    pub async fn remove<'r, R, I>(&self, records: I) -> Result<(), RecordError>
    where
        R: Record,
        I: IntoIterator<Item = &'r mut R>,
    {
        self.store.remove(records).await
    }

    /// Save the sources and return persisted copies of them
    pub async fn clone_records<R: Record>(&self, records: &mut [R]) -> Result<Vec<R>, RecordError> {
        self.store.clone_records(records).await
    }

    /// Load a record of type `R`
    ///
    /// # Errors
    ///
    /// `RecordError::Access` when the stored record has another schema.
    pub async fn find<R: Record>(&self, id: RecordId) -> Result<Option<R>, RecordError> {
        self.store.find(id).await
    }

    /// Schema identifier of a stored record, `None` when it does not exist
    pub async fn record_schema(&self, id: RecordId) -> Result<Option<String>, RecordError> {
        self.store.record_schema(id).await
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Link `reference` with every target; existing links lose their attribute
    pub async fn link(
        &self,
        reference: impl Identified,
        targets: &[impl Identified],
    ) -> Result<(), RecordError> {
        let reference = identity(&reference, "link")?;
        let targets = identities(targets, "link")?;
        self.store.links().link(reference, &targets, None).await
    }

    /// Link `reference` with every target, storing `attribute` on each link
    pub async fn link_with_attribute(
        &self,
        reference: impl Identified,
        targets: &[impl Identified],
        attribute: impl ToValue,
    ) -> Result<(), RecordError> {
        let reference = identity(&reference, "link")?;
        let targets = identities(targets, "link")?;
        let attribute = attribute.to_value();
        self.store
            .links()
            .link(reference, &targets, attribute.as_ref())
            .await
    }

    pub async fn unlink(
        &self,
        reference: impl Identified,
        targets: &[impl Identified],
    ) -> Result<(), RecordError> {
        let reference = identity(&reference, "unlink")?;
        let targets = identities(targets, "unlink")?;
        self.store.links().unlink(reference, &targets).await
    }

    /// Attribute of the link between two records, from either side
    pub async fn link_attribute(
        &self,
        reference: impl Identified,
        target: impl Identified,
    ) -> Result<Option<Value>, RecordError> {
        let reference = identity(&reference, "link attribute")?;
        let target = identity(&target, "link attribute")?;
        self.store.links().attribute(reference, target).await
    }

    pub async fn is_linked(
        &self,
        reference: impl Identified,
        target: impl Identified,
    ) -> Result<bool, RecordError> {
        let reference = identity(&reference, "link check")?;
        let target = identity(&target, "link check")?;
        self.store.links().is_linked(reference, target).await
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    pub async fn add_edge(
        &self,
        parent: impl Identified,
        child: impl Identified,
    ) -> Result<(), RecordError> {
        let parent = identity(&parent, "add edge")?;
        let child = identity(&child, "add edge")?;
        self.store.hierarchy().add_edge(parent, child).await
    }

    pub async fn remove_edge(
        &self,
        parent: impl Identified,
        child: impl Identified,
    ) -> Result<(), RecordError> {
        let parent = identity(&parent, "remove edge")?;
        let child = identity(&child, "remove edge")?;
        self.store.hierarchy().remove_edge(parent, child).await
    }

    pub async fn add_children(
        &self,
        parent: impl Identified,
        children: &[impl Identified],
    ) -> Result<(), RecordError> {
        let parent = identity(&parent, "add children")?;
        let children = identities(children, "add children")?;
        self.store.hierarchy().add_children(parent, &children).await
    }

    pub async fn add_parents(
        &self,
        child: impl Identified,
        parents: &[impl Identified],
    ) -> Result<(), RecordError> {
        let child = identity(&child, "add parents")?;
        let parents = identities(parents, "add parents")?;
        self.store.hierarchy().add_parents(child, &parents).await
    }

    pub async fn remove_children(
        &self,
        parent: impl Identified,
        children: &[impl Identified],
    ) -> Result<(), RecordError> {
        let parent = identity(&parent, "remove children")?;
        let children = identities(children, "remove children")?;
        self.store.hierarchy().remove_children(parent, &children).await
    }

    pub async fn remove_parents(
        &self,
        child: impl Identified,
        parents: &[impl Identified],
    ) -> Result<(), RecordError> {
        let child = identity(&child, "remove parents")?;
        let parents = identities(parents, "remove parents")?;
        self.store.hierarchy().remove_parents(child, &parents).await
    }

    // ------------------------------------------------------------------
    // Queries and index listing
    // ------------------------------------------------------------------

    /// Start a query over records of type `R`
    pub fn query<R: Record>(&self) -> Query<'_, R, S> {
        Query::new(&self.store)
    }

    /// Distinct values stored under an index key, ascending
    pub async fn index_list(&self, index_key: &str) -> Result<Vec<Value>, RecordError> {
        self.store.index().index_list(index_key).await
    }

    /// Distinct values of one indexed field of `R`
    pub async fn index_list_for<R: Record>(&self, field: &str) -> Result<Vec<Value>, RecordError> {
        let schema = self.store.schema::<R>().await?;
        let index_key = schema.field(field)?.index_key().to_string();
        self.index_list(&index_key).await
    }

    /// Type id of a schema identifier
    ///
    /// # Errors
    ///
    /// `RecordError::NotFound` when the schema is unknown and `create` is false.
    pub async fn type_id(&self, schema_id: &str, create: bool) -> Result<i64, RecordError> {
        self.store
            .types()
            .resolve(self.store.session(), schema_id, create)
            .await
    }
}

fn identity(item: &impl Identified, context: &str) -> Result<RecordId, RecordError> {
    item.record_id()
        .ok_or_else(|| RecordError::missing_identity(context))
}

fn identities(items: &[impl Identified], context: &str) -> Result<Vec<RecordId>, RecordError> {
    items.iter().map(|item| identity(item, context)).collect()
}
