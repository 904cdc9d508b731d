//! A lock store that answers from a script and records every call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::infrastructure::{LockStore, StoreError};
use crate::types::LockToken;

pub(crate) const TOKEN: &str = "abc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Acquire {
        keys: Vec<String>,
        store_id: String,
        lease: Duration,
    },
    Release {
        keys: Vec<String>,
        token: LockToken,
        store_id: String,
    },
    Extend {
        keys: Vec<String>,
        token: LockToken,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Grant,
    Deny,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseStep {
    Release,
    AlreadyGone,
    Fail,
}

pub(crate) struct ScriptedStore {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    release_step: ReleaseStep,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedStore {
    fn with_fallback(fallback: Step) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            release_step: ReleaseStep::Release,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn granting() -> Self {
        Self::with_fallback(Step::Grant)
    }

    pub(crate) fn denying() -> Self {
        Self::with_fallback(Step::Deny)
    }

    pub(crate) fn failing() -> Self {
        Self::with_fallback(Step::Fail)
    }

    /// Answer the next acquires with `steps` before falling back.
    pub(crate) fn then(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.lock().unwrap().extend(steps);
        self
    }

    pub(crate) fn release_with(mut self, step: ReleaseStep) -> Self {
        self.release_step = step;
        self
    }

    /// Each acquire takes this long to answer.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn acquire_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Acquire { .. }))
            .count()
    }

    pub(crate) fn releases(&self) -> Vec<(Vec<String>, LockToken)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Release { keys, token, .. } => Some((keys, token)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl LockStore for ScriptedStore {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn acquire(
        &self,
        keys: &[String],
        store_id: &str,
        lease: Duration,
    ) -> Result<Option<LockToken>, StoreError> {
        self.calls.lock().unwrap().push(Call::Acquire {
            keys: keys.to_vec(),
            store_id: store_id.to_string(),
            lease,
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match step {
            Step::Grant => Ok(Some(LockToken::from_issued(TOKEN))),
            Step::Deny => Ok(None),
            Step::Fail => Err(StoreError::Backend("connection refused".into())),
        }
    }

    async fn release(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
    ) -> Result<bool, StoreError> {
        self.calls.lock().unwrap().push(Call::Release {
            keys: keys.to_vec(),
            token: token.clone(),
            store_id: store_id.to_string(),
        });
        match self.release_step {
            ReleaseStep::Release => Ok(true),
            ReleaseStep::AlreadyGone => Ok(false),
            ReleaseStep::Fail => Err(StoreError::Backend("connection reset".into())),
        }
    }

    async fn extend(
        &self,
        keys: &[String],
        token: &LockToken,
        _store_id: &str,
        _lease: Duration,
    ) -> Result<bool, StoreError> {
        self.calls.lock().unwrap().push(Call::Extend {
            keys: keys.to_vec(),
            token: token.clone(),
        });
        Ok(true)
    }
}
