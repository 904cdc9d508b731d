//! # latchkey-core
//!
//! Distributed mutual exclusion for guarded calls.
//! Resolves lock keys from call arguments, acquires them atomically from a
//! pluggable lock store with bounded retry, runs the guarded work and always
//! gives the lock back.

pub mod client;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod key;
pub mod manager;
pub mod policy;
pub mod registry;
pub mod types;

pub use client::Locker;
pub use error::{DistributedLockError, KeyResolutionError, LockAcquisitionTimeoutError};
pub use infrastructure::{LockStore, StoreError};
pub use policy::{LockPolicy, PresetTable};
pub use registry::StoreRegistry;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod manager_test;
