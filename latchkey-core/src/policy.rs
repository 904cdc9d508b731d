//! Per-call lock configuration and named presets.
//!
//! A preset is just a named [`LockPolicy`]; an alias for a common setup is
//! expressed by registering it in a [`PresetTable`] rather than by a
//! separate configuration type.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DistributedLockError;
use crate::types::RetryPolicy;

pub const DEFAULT_STORE_TYPE: &str = "memory";
pub const DEFAULT_STORE_ID: &str = "lock";
pub const DEFAULT_PREFIX: &str = "lock:";
pub const DEFAULT_LEASE_MS: u64 = 10_000;
pub const DEFAULT_RETRY_MS: u64 = 500;
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

fn default_store_type() -> String {
    DEFAULT_STORE_TYPE.to_string()
}
fn default_store_id() -> String {
    DEFAULT_STORE_ID.to_string()
}
fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}
fn default_lease_ms() -> u64 {
    DEFAULT_LEASE_MS
}
fn default_retry_ms() -> u64 {
    DEFAULT_RETRY_MS
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Everything a guarded call needs to know about its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    /// Key templates; empty means "derive from the method name"
    #[serde(default)]
    pub keys: Vec<String>,
    /// Which registered store to use
    #[serde(default = "default_store_type")]
    pub store_type: String,
    /// Namespace inside the store
    #[serde(default = "default_store_id")]
    pub store_id: String,
    /// Prepended to every resolved key
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    /// 0 means a single attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extend the lease at this period while the guarded call runs
    #[serde(default)]
    pub refresh_ms: Option<u64>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            store_type: default_store_type(),
            store_id: default_store_id(),
            prefix: default_prefix(),
            lease_ms: DEFAULT_LEASE_MS,
            retry_ms: DEFAULT_RETRY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            refresh_ms: None,
        }
    }
}

impl LockPolicy {
    pub fn builder() -> LockPolicyBuilder {
        LockPolicyBuilder::default()
    }

    pub fn validate(&self) -> Result<(), DistributedLockError> {
        if self.lease_ms == 0 {
            return Err(DistributedLockError::InvalidPolicy(
                "lease_ms must be greater than 0".into(),
            ));
        }
        if self.retry_ms == 0 {
            return Err(DistributedLockError::InvalidPolicy(
                "retry_ms must be greater than 0".into(),
            ));
        }
        match self.refresh_ms {
            Some(0) => Err(DistributedLockError::InvalidPolicy(
                "refresh_ms must be greater than 0".into(),
            )),
            Some(refresh) if refresh >= self.lease_ms => Err(DistributedLockError::InvalidPolicy(
                format!(
                    "refresh_ms ({refresh}) must be shorter than lease_ms ({})",
                    self.lease_ms
                ),
            )),
            _ => Ok(()),
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn refresh(&self) -> Option<Duration> {
        self.refresh_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, DistributedLockError> {
        RetryPolicy::new(
            Duration::from_millis(self.retry_ms),
            Duration::from_millis(self.timeout_ms),
        )
    }
}

/// Builder for [`LockPolicy`], starting from the defaults.
#[derive(Debug, Clone, Default)]
pub struct LockPolicyBuilder {
    policy: LockPolicy,
}

impl LockPolicyBuilder {
    /// Add a key template.
    pub fn key(mut self, template: impl Into<String>) -> Self {
        self.policy.keys.push(template.into());
        self
    }

    pub fn store_type(mut self, store_type: impl Into<String>) -> Self {
        self.policy.store_type = store_type.into();
        self
    }

    pub fn store_id(mut self, store_id: impl Into<String>) -> Self {
        self.policy.store_id = store_id.into();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.policy.prefix = prefix.into();
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.policy.lease_ms = lease.as_millis() as u64;
        self
    }

    pub fn retry(mut self, interval: Duration, timeout: Duration) -> Self {
        self.policy.retry_ms = interval.as_millis() as u64;
        self.policy.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn refresh(mut self, every: Duration) -> Self {
        self.policy.refresh_ms = Some(every.as_millis() as u64);
        self
    }

    pub fn build(self) -> LockPolicy {
        self.policy
    }
}

/// Named presets, e.g. loaded from a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetTable {
    presets: HashMap<String, LockPolicy>,
}

impl PresetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{ "name": { ...policy... }, ... }` and validate every entry.
    pub fn from_json(json: &str) -> Result<Self, DistributedLockError> {
        let table: Self = serde_json::from_str(json)
            .map_err(|e| DistributedLockError::InvalidPolicy(format!("bad preset file: {e}")))?;
        for (name, policy) in &table.presets {
            policy.validate().map_err(|e| {
                DistributedLockError::InvalidPolicy(format!("preset `{name}`: {e}"))
            })?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, name: impl Into<String>, policy: LockPolicy) -> Option<LockPolicy> {
        self.presets.insert(name.into(), policy)
    }

    pub fn get(&self, name: &str) -> Result<&LockPolicy, DistributedLockError> {
        self.presets
            .get(name)
            .ok_or_else(|| DistributedLockError::UnknownPreset(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }
}
