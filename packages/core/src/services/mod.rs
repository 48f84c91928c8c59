//! Record Services
//!
//! This module contains the record store and the engines built around record
//! identity:
//!
//! - `Records` - facade combining every operation on one session
//! - `RecordStore` - save, load, clone and cascading removal
//! - `IndexEngine` - typed index rows per indexed field
//! - `LinkEngine` - symmetric links with an optional attribute
//! - `HierarchyEngine` - parent/child edges as a transitive closure
//! - `Query` - typed query builder compiled to one SQL statement
//!
//! Services coordinate between the database layer and application types;
//! every mutating operation runs in (or joins) one transaction.

pub mod error;
pub mod hierarchy_engine;
pub mod index_engine;
pub mod link_engine;
pub mod query;
pub mod record_store;
pub mod records;
pub mod serializer;
pub mod type_registry;

pub use error::RecordError;
pub use hierarchy_engine::{HierarchyEngine, PathDirection};
pub use index_engine::IndexEngine;
pub use link_engine::LinkEngine;
pub use query::Query;
pub use record_store::RecordStore;
pub use records::Records;
pub use serializer::{JsonSerializer, Serializer};
pub use type_registry::TypeRegistry;
