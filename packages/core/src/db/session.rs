//! Session
//!
//! A [`Session`] owns one libsql connection and is the SQL execution engine
//! for everything a [`Records`](crate::services::Records) handle does. Cloning
//! a session shares the connection and its transaction state, which is how the
//! engines behind the facade all take part in the same unit of work.

use crate::db::error::DatabaseError;
use crate::db::transaction::TransactionCoordinator;
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Connection, Rows, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One connection plus its transaction flag
#[derive(Clone)]
pub struct Session {
    conn: Connection,
    active: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Underlying connection, for statements the session does not wrap
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a statement with positional parameters, returning affected rows
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, DatabaseError> {
        self.conn
            .execute(sql, Params::Positional(params))
            .await
            .map_err(|e| statement_failed(sql, e))
    }

    /// Run a query and return its row cursor
    ///
    /// Rows are pulled from the engine as the cursor advances, so large
    /// result sets are never materialized unless the caller collects them.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Rows, DatabaseError> {
        self.conn
            .query(sql, Params::Positional(params))
            .await
            .map_err(|e| statement_failed(sql, e))
    }

    /// Collect the first column of every row as an integer
    pub async fn query_ids(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = self.query(sql, params).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        Ok(ids)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

#[async_trait]
impl TransactionCoordinator for Session {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("BEGIN IMMEDIATE TRANSACTION", ())
            .await
            .map_err(|e| DatabaseError::transaction_failed("begin", e))?;
        self.active.store(true, Ordering::SeqCst);
        tracing::trace!("Transaction started");
        Ok(())
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::transaction_failed("commit", e))?;
        self.active.store(false, Ordering::SeqCst);
        tracing::trace!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        self.active.store(false, Ordering::SeqCst);
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::transaction_failed("rollback", e))?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }
}

fn statement_failed(sql: &str, error: libsql::Error) -> DatabaseError {
    DatabaseError::sql_execution(format!("{}: {}", statement_head(sql), error))
}

/// First line of a statement, for error context
fn statement_head(sql: &str) -> &str {
    let trimmed = sql.trim_start();
    let end = trimmed.find('\n').unwrap_or(trimmed.len()).min(80);
    match trimmed.get(..end) {
        Some(head) => head,
        None => trimmed,
    }
}

/// `?, ?, ?` for `count` parameters
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
