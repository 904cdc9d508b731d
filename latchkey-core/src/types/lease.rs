use std::fmt;

use tokio::time::Instant;

use super::{LockKeySpec, LockToken};

/// Lifecycle of the lock of one guarded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Nothing attempted yet
    Pending,
    /// Retry loop running
    Acquiring,
    /// Every key of the group is held
    Acquired,
    /// Released back to the store (or already gone)
    Released,
    /// Deadline passed without acquiring
    TimedOut,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Pending => write!(f, "PENDING"),
            LockState::Acquiring => write!(f, "ACQUIRING"),
            LockState::Acquired => write!(f, "ACQUIRED"),
            LockState::Released => write!(f, "RELEASED"),
            LockState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// A lock currently held by one in-flight invocation.
#[derive(Debug, Clone)]
pub struct AcquiredLock {
    /// The key group that was claimed
    pub spec: LockKeySpec,
    /// Token the store issued for the group
    pub token: LockToken,
    /// When the store will consider the lease expired, unless extended
    pub expires_at: Instant,
    /// Number of store calls it took to get the lock
    pub attempts: u32,
}

impl AcquiredLock {
    pub fn keys(&self) -> &[String] {
        self.spec.keys()
    }
}
