use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::StoreError;

/// A key template could not be turned into a lock key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyResolutionError {
    #[error("invalid key expression `{template}`: {message}")]
    Syntax { template: String, message: String },

    #[error("key expression `{template}` references argument {index}, but the call has {len}")]
    ArgumentOutOfRange {
        template: String,
        index: usize,
        len: usize,
    },

    #[error("key expression `{template}` references unknown parameter `{name}`")]
    UnknownParameter { template: String, name: String },

    #[error("key expression `{template}` has no value at `{path}`")]
    MissingValue { template: String, path: String },

    #[error("key expression `{template}` evaluated to null")]
    Null { template: String },

    #[error("key expression `{template}` evaluated to a {kind}, expected a string")]
    NotAString { template: String, kind: &'static str },
}

/// The store never yielded the lock before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not acquire lock on {keys:?} within {timeout:?} ({attempts} attempts)")]
pub struct LockAcquisitionTimeoutError {
    pub keys: Vec<String>,
    pub timeout: Duration,
    pub attempts: u32,
}

/// Everything that prevents a guarded call from running.
#[derive(Debug, Error)]
pub enum DistributedLockError {
    #[error("no lock store registered as `{0}`")]
    UnknownStore(String),

    #[error("no lock preset named `{0}`")]
    UnknownPreset(String),

    #[error("invalid lock policy: {0}")]
    InvalidPolicy(String),

    #[error("failed to resolve lock key for {method}")]
    KeyResolution {
        method: String,
        #[source]
        source: KeyResolutionError,
    },

    #[error("failed to acquire lock for {method}")]
    Timeout {
        method: String,
        #[source]
        source: LockAcquisitionTimeoutError,
    },

    #[error("lock store failed while acquiring lock for {method}")]
    Store {
        method: String,
        #[source]
        source: StoreError,
    },
}

impl DistributedLockError {
    /// True for mistakes in wiring or policy, as opposed to contention or
    /// store trouble at runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownStore(_)
                | Self::UnknownPreset(_)
                | Self::InvalidPolicy(_)
                | Self::KeyResolution { .. }
        )
    }
}
