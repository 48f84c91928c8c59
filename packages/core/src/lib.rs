//! RecordSpace Core
//!
//! Generic persistence for application-defined record types on embedded
//! libsql. Records are stored as serialized payloads in one fixed schema;
//! adding a record type never requires a migration.
//!
//! # Architecture
//!
//! - **Payload storage**: every record is one row holding its serde payload
//!   and an optional binary blob
//! - **Typed indexes**: fields registered in [`Record::describe`] are
//!   projected into typed index rows for filtering and sorting
//! - **Links**: symmetric record associations with an optional attribute
//! - **Hierarchy**: parent/child edges kept as a transitive closure
//! - **Tenancy**: a session may be bound to a tenant and then only sees its
//!   own records
//!
//! # Modules
//!
//! - [`models`] - Record trait, metadata, values and field descriptors
//! - [`services`] - Record store, engines, query builder and the facade
//! - [`db`] - Database layer with libsql integration
//! - [`config`] - Database and session configuration

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{DatabaseConfig, RecordsConfig};
pub use db::{DatabaseError, DatabaseService};
pub use models::*;
pub use services::{JsonSerializer, Query, RecordError, Records, Serializer};
