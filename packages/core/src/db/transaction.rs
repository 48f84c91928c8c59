//! Transaction Coordination
//!
//! Every mutating operation runs as one unit of work. A call either opens a
//! transaction or, when one is already active on the session, joins it. Only
//! the call that opened the transaction commits or rolls it back, so nested
//! operations (a save inside a caller's `transaction`, a type registration
//! inside a save) commit together.
//!
//! # Failure handling
//!
//! - `begin`/`commit` failures surface as [`DatabaseError::TransactionFailed`]
//! - any error from the work triggers a rollback; a failing rollback is
//!   logged and the original error is returned

use crate::db::error::DatabaseError;
use async_trait::async_trait;
use std::future::Future;

/// Scoped unit-of-work control for one session
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Whether a transaction is currently open on this session
    fn is_active(&self) -> bool;

    async fn begin(&self) -> Result<(), DatabaseError>;

    async fn commit(&self) -> Result<(), DatabaseError>;

    async fn rollback(&self) -> Result<(), DatabaseError>;
}

/// Run `work` inside a transaction, joining the active one if present
///
/// # Errors
///
/// Returns the error produced by `work`, or the coordinator error when the
/// transaction cannot be opened or committed.
pub async fn in_transaction<C, T, E, F, Fut>(coordinator: &C, work: F) -> Result<T, E>
where
    C: TransactionCoordinator + ?Sized,
    E: From<DatabaseError> + std::fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if coordinator.is_active() {
        return work().await;
    }

    coordinator.begin().await?;

    match work().await {
        Ok(value) => {
            if let Err(commit_err) = coordinator.commit().await {
                if let Err(rollback_err) = coordinator.rollback().await {
                    tracing::warn!("Rollback after failed commit also failed: {}", rollback_err);
                }
                return Err(commit_err.into());
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = coordinator.rollback().await {
                tracing::error!(
                    "Rollback failed ({}) while handling error: {}",
                    rollback_err,
                    err
                );
            }
            Err(err)
        }
    }
}
