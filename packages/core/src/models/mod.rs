//! Data Models
//!
//! In-memory side of the record store:
//!
//! - [`Record`] - trait implemented by persistable application types
//! - [`RecordMeta`] - identity and blob carried by every record
//! - [`Value`] - typed index and link-attribute values
//! - [`Schema`] - indexed-field descriptors of one record type

mod record;
mod schema;
mod value;

pub use record::{Identified, Identity, Record, RecordId, RecordMeta};
pub use schema::{
    default_index_key, FieldDescriptor, Schema, SchemaBuilder, SchemaError, SchemaRegistry,
};
pub use value::{ToValue, Value, ValueKind};
