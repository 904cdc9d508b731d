use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::LockAcquisitionTimeoutError;
use crate::infrastructure::{LockStore, StoreError};
use crate::types::{AcquiredLock, LockKeySpec, LockState, RetryPolicy};

/// Why the retry loop gave up.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    TimedOut(#[from] LockAcquisitionTimeoutError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives acquisition of one key group with retry and deadline, and its
/// release afterwards. Holds no per-invocation state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockManager;

impl LockManager {
    pub fn new() -> Self {
        Self
    }

    /// Try the store until it hands out a token or the retry deadline
    /// passes. The deadline is measured from the first attempt and is hard:
    /// the last wait is cut short to end on it, and no attempt is made once
    /// it has passed. A store error ends the loop at once.
    pub async fn acquire(
        &self,
        store: &dyn LockStore,
        spec: &LockKeySpec,
        lease: Duration,
        retry: RetryPolicy,
    ) -> Result<AcquiredLock, AcquireError> {
        let mut state = LockState::Pending;
        let started = Instant::now();
        // None: too far out to represent, never reached
        let deadline = started.checked_add(retry.timeout());
        let past_deadline = || deadline.is_some_and(|d| Instant::now() >= d);
        let mut attempts = 0u32;

        loop {
            state = transition(spec, state, LockState::Acquiring);
            attempts += 1;

            // the store starts the lease no earlier than this
            let attempted_at = Instant::now();
            if let Some(token) = store.acquire(spec.keys(), &spec.store_id, lease).await? {
                transition(spec, state, LockState::Acquired);
                if attempts > 1 {
                    tracing::info!(
                        keys = ?spec.keys(),
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Lock acquired after contention"
                    );
                }
                return Ok(AcquiredLock {
                    spec: spec.clone(),
                    token,
                    expires_at: attempted_at + lease,
                    attempts,
                });
            }

            if past_deadline() {
                return Err(timed_out(spec, state, retry, attempts));
            }
            tracing::trace!(keys = ?spec.keys(), attempts, "Lock held elsewhere, retrying");
            // never sleep past the deadline
            let wait = match deadline {
                Some(d) => retry
                    .retry_interval()
                    .min(d.saturating_duration_since(Instant::now())),
                None => retry.retry_interval(),
            };
            tokio::time::sleep(wait).await;
            if past_deadline() {
                return Err(timed_out(spec, state, retry, attempts));
            }
        }
    }

    /// Give the keys back. Never fails: a lock that already expired or was
    /// taken over, and store errors, are logged and reported as `false`.
    pub async fn release(&self, store: &dyn LockStore, lock: &AcquiredLock) -> bool {
        match store
            .release(lock.keys(), &lock.token, &lock.spec.store_id)
            .await
        {
            Ok(true) => {
                transition(&lock.spec, LockState::Acquired, LockState::Released);
                true
            }
            Ok(false) => {
                tracing::warn!(
                    keys = ?lock.keys(),
                    store = store.name(),
                    "Lock was already released or expired before release"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    keys = ?lock.keys(),
                    store = store.name(),
                    error = %e,
                    "Failed to release lock; it will expire with its lease"
                );
                false
            }
        }
    }

    /// Keep a held lock alive by extending it to `lease` every `every`.
    /// The task stops on its own when the store refuses or fails; abort the
    /// handle once the guarded work is done.
    pub fn spawn_refresh(
        &self,
        store: Arc<dyn LockStore>,
        lock: &AcquiredLock,
        lease: Duration,
        every: Duration,
    ) -> JoinHandle<()> {
        let spec = lock.spec.clone();
        let token = lock.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                ticker.tick().await;
                match store.extend(spec.keys(), &token, &spec.store_id, lease).await {
                    Ok(true) => tracing::trace!(keys = ?spec.keys(), "Lock lease refreshed"),
                    Ok(false) => {
                        tracing::warn!(
                            keys = ?spec.keys(),
                            "Lock lost before refresh; stopping refresh"
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            keys = ?spec.keys(),
                            error = %e,
                            "Lock refresh failed; stopping refresh"
                        );
                        return;
                    }
                }
            }
        })
    }
}

fn transition(spec: &LockKeySpec, from: LockState, to: LockState) -> LockState {
    if from != to {
        tracing::debug!(keys = ?spec.keys(), store_id = %spec.store_id, %from, %to, "Lock state");
    }
    to
}

fn timed_out(
    spec: &LockKeySpec,
    state: LockState,
    retry: RetryPolicy,
    attempts: u32,
) -> AcquireError {
    transition(spec, state, LockState::TimedOut);
    AcquireError::TimedOut(LockAcquisitionTimeoutError {
        keys: spec.keys().to_vec(),
        timeout: retry.timeout(),
        attempts,
    })
}
