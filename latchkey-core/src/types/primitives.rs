use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DistributedLockError;

/// Proof of ownership handed out by a lock store on a successful acquire.
///
/// Tokens are generated by the store and must be presented verbatim to
/// release or extend the same lock. The debug representation is redacted so
/// that tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    /// Wrap a token string previously issued by a store (e.g. received over
    /// the wire).
    pub fn from_issued(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockToken(..)")
    }
}

/// The resolved key group of one guarded invocation, plus the namespace it
/// lives in inside the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockKeySpec {
    keys: Vec<String>,
    /// Namespace inside the backing store (table partition, key prefix, ...)
    pub store_id: String,
}

impl LockKeySpec {
    /// Build a key group. Duplicate keys are collapsed (first occurrence
    /// wins) and an empty group is rejected.
    pub fn new(
        keys: impl IntoIterator<Item = String>,
        store_id: impl Into<String>,
    ) -> Result<Self, DistributedLockError> {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        if unique.is_empty() {
            return Err(DistributedLockError::InvalidPolicy(
                "a lock needs at least one key".into(),
            ));
        }
        Ok(Self {
            keys: unique,
            store_id: store_id.into(),
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// How long and how often the manager retries a contended acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_interval: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// `retry_interval` must be non-zero. A zero `timeout` means a single
    /// attempt.
    pub fn new(retry_interval: Duration, timeout: Duration) -> Result<Self, DistributedLockError> {
        if retry_interval.is_zero() {
            return Err(DistributedLockError::InvalidPolicy(
                "retry interval must be greater than 0".into(),
            ));
        }
        Ok(Self {
            retry_interval,
            timeout,
        })
    }

    /// Exactly one attempt, no retries.
    pub fn single_attempt() -> Self {
        Self {
            retry_interval: Duration::from_millis(1),
            timeout: Duration::ZERO,
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Identity of the guarded call, as supplied by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Fully-qualified name, e.g. `billing::InvoiceService::settle`
    pub qualified_name: String,
    /// Parameter names in declaration order, used by `#name` references
    #[serde(default)]
    pub param_names: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            param_names: Vec::new(),
        }
    }

    pub fn with_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Position of a named parameter.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|p| p == name)
    }
}
