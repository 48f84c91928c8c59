//! Record Model
//!
//! Application types become persistable by implementing [`Record`]. A record
//! carries a [`RecordMeta`] (identity and optional binary blob) that is kept
//! out of the serialized payload:
//!
//! ```
//! use recordspace_core::{Record, RecordMeta, SchemaBuilder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Person {
//!     #[serde(skip)]
//!     meta: RecordMeta,
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Record for Person {
//!     const SCHEMA_ID: &'static str = "demo.Person";
//!
//!     fn meta(&self) -> &RecordMeta {
//!         &self.meta
//!     }
//!
//!     fn meta_mut(&mut self) -> &mut RecordMeta {
//!         &mut self.meta
//!     }
//!
//!     fn describe(schema: &mut SchemaBuilder<Self>) {
//!         schema.index("name", |p: &Person| p.name.clone());
//!         schema.index("age", |p: &Person| p.age);
//!     }
//! }
//! ```

use crate::models::schema::SchemaBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage identity of a record row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId(id)
    }
}

/// Lifecycle state of an in-memory record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Never saved
    #[default]
    New,
    Persisted(RecordId),
    /// Removed from storage; saving it again is a no-op
    Removed,
}

/// Storage metadata embedded in every record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    identity: Identity,
    blob: Option<Vec<u8>>,
    blob_changed: bool,
}

impl RecordMeta {
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Persisted id, if any
    pub fn id(&self) -> Option<RecordId> {
        match self.identity {
            Identity::Persisted(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.identity == Identity::Removed
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Replace the binary blob; it is written on the next save
    pub fn set_blob(&mut self, blob: Option<Vec<u8>>) {
        self.blob = blob;
        self.blob_changed = true;
    }

    pub fn blob_changed(&self) -> bool {
        self.blob_changed
    }

    pub(crate) fn loaded(id: RecordId, blob: Option<Vec<u8>>) -> Self {
        Self {
            identity: Identity::Persisted(id),
            blob,
            blob_changed: false,
        }
    }

    pub(crate) fn assign(&mut self, id: RecordId) {
        self.identity = Identity::Persisted(id);
    }

    pub(crate) fn invalidate(&mut self) {
        self.identity = Identity::Removed;
    }
}

/// A persistable record type
///
/// The payload is the serde form of the implementing type; `RecordMeta`
/// must be excluded from it with `#[serde(skip)]`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable schema identifier stored in the type registry
    const SCHEMA_ID: &'static str;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Register indexed fields. The default indexes nothing.
    fn describe(schema: &mut SchemaBuilder<Self>) {
        let _ = schema;
    }

    fn id(&self) -> Option<RecordId> {
        self.meta().id()
    }
}

/// Anything that can name a stored record: a record reference or a raw id
pub trait Identified {
    fn record_id(&self) -> Option<RecordId>;
}

impl Identified for RecordId {
    fn record_id(&self) -> Option<RecordId> {
        Some(*self)
    }
}

impl<R: Record> Identified for &R {
    fn record_id(&self) -> Option<RecordId> {
        self.id()
    }
}

impl<R: Record> Identified for &mut R {
    fn record_id(&self) -> Option<RecordId> {
        self.id()
    }
}
