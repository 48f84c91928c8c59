//! Database Connection Management
//!
//! This module provides the database connection and schema initialization
//! for the record store using embedded libsql.
//!
//! # Architecture
//!
//! - **Fixed schema**: five tables hold every record type; new record types
//!   never require a migration
//! - **WAL mode**: Write-Ahead Logging for concurrent readers
//! - **Shared registries**: schema-id and field-descriptor caches live here so
//!   every session opened from one service reuses them
//!
//! # Tables
//!
//! | table          | purpose                                             |
//! |----------------|-----------------------------------------------------|
//! | `record_type`  | schema identifier to integer type id                 |
//! | `record`       | one row per record: type, tenant, payload, blob     |
//! | `record_index` | one typed value per (index key, record, field)      |
//! | `record_link`  | mirrored association rows with optional attribute   |
//! | `record_path`  | transitive closure of parent/child edges            |
//!
//! # Database Connection Patterns
//!
//! Use [`DatabaseService::session`] for record work and
//! [`DatabaseService::connect_with_timeout`] for raw statements. Both set the
//! configured busy timeout, so concurrent writers wait for the lock instead of
//! failing immediately with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use recordspace_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/records.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseConfig;
use crate::db::error::DatabaseError;
use crate::db::session::Session;
use crate::models::SchemaRegistry;
use crate::services::TypeRegistry;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql database and schema
///
/// Cheap to clone; clones share the database handle and registries.
///
/// # Examples
///
/// ```no_run
/// use recordspace_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/records.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
    type_registry: Arc<TypeRegistry>,
    schemas: Arc<SchemaRegistry>,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("db_path", &self.db_path)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_config(DatabaseConfig::new(db_path)).await
    }

    /// Create a DatabaseService from a full [`DatabaseConfig`]
    pub async fn with_config(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let DatabaseConfig {
            path: db_path,
            busy_timeout_ms,
        } = config;

        let is_new_database = !db_path.exists();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
            type_registry: Arc::new(TypeRegistry::new()),
            schemas: Arc::new(SchemaRegistry::new()),
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Creates tables and indexes using CREATE TABLE IF NOT EXISTS, so
    /// initialization is idempotent.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_type (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_id TEXT NOT NULL UNIQUE
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create record_type table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type_id INTEGER NOT NULL REFERENCES record_type(id),
                tenant TEXT,
                payload TEXT NOT NULL,
                blob BLOB
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create record table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_index (
                index_key TEXT NOT NULL,
                record_id INTEGER NOT NULL,
                field_name TEXT NOT NULL,
                text_value TEXT,
                numeric_value NUMERIC,
                timestamp_value INTEGER,
                PRIMARY KEY (index_key, record_id, field_name)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create record_index table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_link (
                reference_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                text_value TEXT,
                numeric_value NUMERIC,
                timestamp_value INTEGER,
                PRIMARY KEY (reference_id, target_id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create record_link table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_path (
                hop_parent_id INTEGER NOT NULL,
                hop_child_id INTEGER NOT NULL,
                ancestor_id INTEGER NOT NULL,
                PRIMARY KEY (hop_parent_id, hop_child_id, ancestor_id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create record_path table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        tracing::info!("Record schema initialized at {}", self.db_path.display());
        Ok(())
    }

    /// Create secondary indexes backing the reverse lookups
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        const INDEXES: &[(&str, &str)] = &[
            ("idx_record_type", "record(type_id)"),
            ("idx_record_tenant", "record(tenant)"),
            ("idx_record_index_record", "record_index(record_id)"),
            ("idx_record_link_target", "record_link(target_id)"),
            ("idx_record_path_child", "record_path(hop_child_id)"),
            ("idx_record_path_ancestor", "record_path(ancestor_id)"),
        ];

        for (name, target) in INDEXES {
            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, target),
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Get a connection to the database without a busy timeout
    ///
    /// Prefer [`connect_with_timeout`](Self::connect_with_timeout) in async code.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with the configured busy timeout
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;

        Ok(conn)
    }

    /// Open a fresh session (its own connection and transaction state)
    pub async fn session(&self) -> Result<Session, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        Ok(Session::new(conn))
    }

    /// Schema-identifier cache shared by every session of this database
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.type_registry
    }

    /// Index-field descriptor cache shared by every session of this database
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path).await.unwrap();
        let conn = db_service.connect().unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master
                 WHERE type='table' AND name LIKE 'record%' ORDER BY name",
                (),
            )
            .await
            .unwrap();

        let mut table_names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let name: String = row.get(0).unwrap();
            table_names.push(name);
        }

        assert_eq!(
            table_names,
            vec!["record", "record_index", "record_link", "record_path", "record_type"]
        );
    }

    #[tokio::test]
    async fn test_indexes_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path).await.unwrap();
        let conn = db_service.connect().unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
                (),
            )
            .await
            .unwrap();

        let mut index_names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let name: String = row.get(0).unwrap();
            index_names.push(name);
        }

        assert!(index_names.contains(&"idx_record_type".to_string()));
        assert!(index_names.contains(&"idx_record_tenant".to_string()));
        assert!(index_names.contains(&"idx_record_link_target".to_string()));
        assert!(index_names.contains(&"idx_record_path_child".to_string()));
        assert!(index_names.contains(&"idx_record_path_ancestor".to_string()));
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path).await.unwrap();
        let conn = db_service.connect().unwrap();

        let mut rows = conn.query("PRAGMA journal_mode", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let mode: String = row.get(0).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _db_service1 = DatabaseService::new(db_path.clone()).await.unwrap();
        let db_service2 = DatabaseService::new(db_path.clone()).await.unwrap();

        let conn = db_service2.connect().unwrap();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name LIKE 'record%'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_configured_busy_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: temp_dir.path().join("test.db"),
            busy_timeout_ms: 1234,
        };

        let db_service = DatabaseService::with_config(config).await.unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let mut rows = conn.query("PRAGMA busy_timeout", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let timeout: i64 = row.get(0).unwrap();
        assert_eq!(timeout, 1234);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let session1 = db_service.session().await.unwrap();
        let session2 = db_service.session().await.unwrap();

        use crate::db::TransactionCoordinator;
        session1.begin().await.unwrap();
        assert!(session1.is_active());
        assert!(!session2.is_active());
        session1.rollback().await.unwrap();
        assert!(!session1.is_active());
    }
}
