use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DistributedLockError;
use crate::infrastructure::LockStore;

/// Maps store-type identifiers (`"memory"`, `"sqlite"`, ...) to clients.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn LockStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under `store_type`, replacing any previous one.
    pub fn register(
        &mut self,
        store_type: impl Into<String>,
        store: Arc<dyn LockStore>,
    ) -> &mut Self {
        self.stores.insert(store_type.into(), store);
        self
    }

    pub fn with(mut self, store_type: impl Into<String>, store: Arc<dyn LockStore>) -> Self {
        self.register(store_type, store);
        self
    }

    pub fn resolve(&self, store_type: &str) -> Result<Arc<dyn LockStore>, DistributedLockError> {
        self.stores
            .get(store_type)
            .cloned()
            .ok_or_else(|| DistributedLockError::UnknownStore(store_type.to_string()))
    }

    pub fn store_types(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.stores.iter().map(|(k, v)| (k, v.name())))
            .finish()
    }
}
