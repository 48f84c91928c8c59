//! Database Layer
//!
//! This module handles all database interactions using embedded libsql:
//!
//! - Database initialization and connection management
//! - Fixed five-table schema shared by every record type
//! - Sessions pairing a connection with its transaction state
//! - Re-entrant transaction scopes
//!
//! # Architecture
//!
//! A [`DatabaseService`] owns the database handle and the registries shared
//! by all of its sessions. Each [`Session`] owns one connection; a
//! transaction opened on a session is joined by every operation made through
//! it until the scope that opened it commits or rolls back.

mod database;
mod error;
mod session;
mod transaction;

pub use database::DatabaseService;
pub use error::DatabaseError;
pub(crate) use session::placeholders;
pub use session::Session;
pub use transaction::{in_transaction, TransactionCoordinator};
