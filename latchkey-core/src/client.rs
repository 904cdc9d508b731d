//! High-level entry point: run a unit of work while holding its lock.
//!
//! Interception is explicit. The embedding application wraps the body of a
//! guarded operation in a closure and hands it to [`Locker::invoke`] together
//! with the call arguments and the operation's identity.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::DistributedLockError;
use crate::infrastructure::LockStore;
use crate::key::KeyEvaluator;
use crate::manager::{AcquireError, LockManager};
use crate::policy::{LockPolicy, PresetTable};
use crate::registry::StoreRegistry;
use crate::types::{AcquiredLock, LockKeySpec, MethodDescriptor};

/// Runs guarded invocations against a set of registered lock stores.
///
/// Cheap to clone; holds only configuration.
#[derive(Debug, Clone)]
pub struct Locker {
    registry: Arc<StoreRegistry>,
    presets: Arc<PresetTable>,
    evaluator: KeyEvaluator,
    manager: LockManager,
}

impl Locker {
    pub fn new(registry: StoreRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            presets: Arc::new(PresetTable::new()),
            evaluator: KeyEvaluator::new(),
            manager: LockManager::new(),
        }
    }

    pub fn with_presets(mut self, presets: PresetTable) -> Self {
        self.presets = Arc::new(presets);
        self
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// Resolve the key group a call would lock, without touching any store.
    /// With no templates the key is the method's qualified name.
    pub fn resolve_keys(
        &self,
        policy: &LockPolicy,
        args: &[Value],
        method: &MethodDescriptor,
    ) -> Result<LockKeySpec, DistributedLockError> {
        let raw = if policy.keys.is_empty() {
            vec![method.qualified_name.clone()]
        } else {
            self.evaluator
                .evaluate(&policy.keys, args, method)
                .map_err(|source| DistributedLockError::KeyResolution {
                    method: method.qualified_name.clone(),
                    source,
                })?
        };
        LockKeySpec::new(
            raw.into_iter().map(|key| format!("{}{}", policy.prefix, key)),
            policy.store_id.clone(),
        )
    }

    /// Run `continuation` exactly once while holding the policy's lock.
    ///
    /// The continuation never starts unless every key was acquired. Once it
    /// has started the lock is released on every exit path: success, error,
    /// panic (released, then the panic resumes) and cancellation of the
    /// returned future (release is spawned onto the current runtime). The
    /// continuation's own result is returned untouched.
    pub async fn invoke<V, E, F, Fut>(
        &self,
        policy: &LockPolicy,
        args: &[Value],
        method: &MethodDescriptor,
        continuation: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<DistributedLockError>,
    {
        let store = self.registry.resolve(&policy.store_type)?;
        policy.validate()?;
        let retry = policy.retry_policy()?;
        let spec = self.resolve_keys(policy, args, method)?;

        let lock = self
            .manager
            .acquire(store.as_ref(), &spec, policy.lease(), retry)
            .await
            .map_err(|e| match e {
                AcquireError::TimedOut(source) => DistributedLockError::Timeout {
                    method: method.qualified_name.clone(),
                    source,
                },
                AcquireError::Store(source) => DistributedLockError::Store {
                    method: method.qualified_name.clone(),
                    source,
                },
            })?;
        tracing::debug!(
            method = %method.qualified_name,
            keys = ?lock.keys(),
            "Running guarded call"
        );

        let mut guard = ReleaseGuard {
            store: Arc::clone(&store),
            lock: Some(lock.clone()),
            manager: self.manager,
        };
        let refresh = policy.refresh().map(|every| {
            AbortOnDrop(
                self.manager
                    .spawn_refresh(Arc::clone(&store), &lock, policy.lease(), every),
            )
        });

        let outcome = AssertUnwindSafe(async move { continuation().await })
            .catch_unwind()
            .await;

        drop(refresh);
        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::warn!(
                    method = %method.qualified_name,
                    "Guarded call panicked; lock released"
                );
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Like [`Locker::invoke`], with the policy looked up by preset name.
    pub async fn invoke_preset<V, E, F, Fut>(
        &self,
        preset: &str,
        args: &[Value],
        method: &MethodDescriptor,
        continuation: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<DistributedLockError>,
    {
        let policy = self.presets.get(preset)?.clone();
        self.invoke(&policy, args, method, continuation).await
    }
}

/// Releases the lock when dropped, unless it was already released
/// explicitly.
struct ReleaseGuard {
    store: Arc<dyn LockStore>,
    lock: Option<AcquiredLock>,
    manager: LockManager,
}

impl ReleaseGuard {
    async fn release(&mut self) -> bool {
        let released = match &self.lock {
            Some(lock) => self.manager.release(self.store.as_ref(), lock).await,
            None => false,
        };
        self.lock = None;
        released
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(
                    keys = ?lock.keys(),
                    "Guarded call cancelled; releasing lock in background"
                );
                let store = Arc::clone(&self.store);
                let manager = self.manager;
                handle.spawn(async move {
                    manager.release(store.as_ref(), &lock).await;
                });
            }
            Err(_) => tracing::warn!(
                keys = ?lock.keys(),
                "Guarded call dropped outside a runtime; lock will expire with its lease"
            ),
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
