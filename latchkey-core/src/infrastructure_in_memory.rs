use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::infrastructure::{LockStore, StoreError};
use crate::types::LockToken;

#[derive(Debug, Clone)]
struct HeldKey {
    token: LockToken,
    expires_at: Instant,
}

/// Process-local lock store. Useful for tests and single-node deployments.
///
/// Expiry follows tokio's clock, so paused-time tests can drive leases.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    // (store_id, key) -> current holder
    held: Mutex<HashMap<(String, String), HeldKey>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held by a live lease.
    pub fn active_keys(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let held = self.state()?;
        Ok(held.values().filter(|h| h.expires_at > now).count())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut held = self.state()?;
        let before = held.len();
        held.retain(|_, h| h.expires_at > now);
        Ok(before - held.len())
    }

    /// Leave the mutex poisoned, as a holder panicking mid-update would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = self.held.lock();
            panic!("holder panicked mid-update");
        }));
    }

    fn state(&self) -> Result<MutexGuard<'_, HashMap<(String, String), HeldKey>>, StoreError> {
        self.held.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn entry_key(store_id: &str, key: &str) -> (String, String) {
    (store_id.to_string(), key.to_string())
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn acquire(
        &self,
        keys: &[String],
        store_id: &str,
        lease: Duration,
    ) -> Result<Option<LockToken>, StoreError> {
        let now = Instant::now();
        let mut held = self.state()?;

        let contended = keys.iter().any(|key| {
            held.get(&entry_key(store_id, key))
                .is_some_and(|h| h.expires_at > now)
        });
        if contended {
            return Ok(None);
        }

        let token = LockToken::generate();
        let expires_at = now + lease;
        for key in keys {
            held.insert(
                entry_key(store_id, key),
                HeldKey {
                    token: token.clone(),
                    expires_at,
                },
            );
        }
        Ok(Some(token))
    }

    async fn release(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut held = self.state()?;
        let mut released = 0;
        for key in keys {
            let entry = entry_key(store_id, key);
            if held.get(&entry).is_some_and(|h| &h.token == token) {
                let h = held.remove(&entry);
                // An expired entry may still be ours, but the lease was
                // already lost, so it does not count as released.
                if h.is_some_and(|h| h.expires_at > now) {
                    released += 1;
                }
            }
        }
        Ok(released == keys.len())
    }

    async fn extend(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut held = self.state()?;

        let all_live = keys.iter().all(|key| {
            held.get(&entry_key(store_id, key))
                .is_some_and(|h| &h.token == token && h.expires_at > now)
        });
        if !all_live {
            return Ok(false);
        }

        let expires_at = now + lease;
        for key in keys {
            if let Some(h) = held.get_mut(&entry_key(store_id, key)) {
                h.expires_at = expires_at;
            }
        }
        Ok(true)
    }
}
