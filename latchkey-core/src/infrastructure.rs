use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::LockToken;

/// Failure talking to a lock store. Distinct from a lock being held, which
/// is reported as `Ok(None)` / `Ok(false)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock store backend error: {0}")]
    Backend(String),

    #[error("lock store state poisoned by a panicking holder")]
    Poisoned,

    #[error("lock store task failed: {0}")]
    Join(String),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Defines the contract for lock storage backends.
///
/// Every call treats `keys` as one group: acquire claims all of them or none,
/// release and extend only touch entries held by the presented token.
/// Callers pass distinct keys; `LockKeySpec` collapses duplicates, and the
/// `true` results of release and extend count each key once.
/// Implementations must be safe to call concurrently from independent
/// invocations.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Label used in logs and health output.
    fn name(&self) -> &str;

    /// Try to claim every key at once. Returns `Ok(None)` if any key is held
    /// by a live lease. Never waits for the lock.
    async fn acquire(
        &self,
        keys: &[String],
        store_id: &str,
        lease: Duration,
    ) -> Result<Option<LockToken>, StoreError>;

    /// Release the keys held by `token`. `Ok(true)` iff every key was
    /// released by this call.
    async fn release(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
    ) -> Result<bool, StoreError>;

    /// Push the expiry of every key held by `token` to now + `lease`.
    /// `Ok(true)` iff all keys were still held.
    async fn extend(
        &self,
        _keys: &[String],
        _token: &LockToken,
        _store_id: &str,
        _lease: Duration,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }
}
