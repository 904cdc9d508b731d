use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::Value;

use latchkey_core::policy::{
    DEFAULT_LEASE_MS, DEFAULT_RETRY_MS, DEFAULT_STORE_ID, DEFAULT_TIMEOUT_MS,
};
use latchkey_core::types::MethodDescriptor;
use latchkey_core::{DistributedLockError, LockPolicy, Locker, PresetTable, StoreRegistry};

use crate::storage::open_store;

/// Exit code when the command never ran because the lock was not obtained
/// (EX_TEMPFAIL).
pub const LOCK_FAILED_EXIT: u8 = 75;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Storage backend: "memory" or "sqlite:<path>"
    #[arg(long, default_value = "memory", env = "LATCHKEY_STORAGE")]
    pub storage: String,

    /// Key template, e.g. "'deploy:' + #p0" (repeatable)
    #[arg(short, long = "key")]
    pub keys: Vec<String>,

    /// Argument available to key templates as #p0, #p1, ... (JSON, or a plain string)
    #[arg(short, long = "arg")]
    pub args: Vec<String>,

    /// Name of the guarded operation; the default key when no --key is given
    #[arg(long)]
    pub name: Option<String>,

    /// JSON file of named lock presets
    #[arg(long, env = "LATCHKEY_PRESETS")]
    pub preset_file: Option<PathBuf>,

    /// Preset to use instead of the lock options below; it always runs
    /// against --storage
    #[arg(long, requires = "preset_file")]
    pub preset: Option<String>,

    #[arg(long, default_value = DEFAULT_STORE_ID)]
    pub store_id: String,

    #[arg(long, default_value_t = DEFAULT_LEASE_MS)]
    pub lease_ms: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_MS)]
    pub retry_ms: u64,

    /// 0 tries exactly once
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Extend the lease at this period while the command runs
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Command to run while holding the lock
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub(crate) fn policy(&self, store_type: &str) -> anyhow::Result<(LockPolicy, PresetTable)> {
        let presets = match &self.preset_file {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read preset file {}", path.display()))?;
                PresetTable::from_json(&json)?
            }
            None => PresetTable::new(),
        };

        let policy = match &self.preset {
            Some(name) => {
                let mut policy = presets.get(name)?.clone();
                // only the store opened by --storage is registered
                if policy.store_type != store_type {
                    tracing::debug!(
                        preset = %name,
                        from = %policy.store_type,
                        to = %store_type,
                        "Pointing preset at the opened store"
                    );
                    policy.store_type = store_type.to_string();
                }
                policy
            }
            None => LockPolicy {
                keys: self.keys.clone(),
                store_type: store_type.to_string(),
                store_id: self.store_id.clone(),
                lease_ms: self.lease_ms,
                retry_ms: self.retry_ms,
                timeout_ms: self.timeout_ms,
                refresh_ms: self.refresh_ms,
                ..LockPolicy::default()
            },
        };
        Ok((policy, presets))
    }

    fn method(&self) -> MethodDescriptor {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("run::{}", self.command.join(" ")));
        MethodDescriptor::new(name)
    }

    pub(crate) fn call_args(&self) -> Vec<Value> {
        self.args
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            .collect()
    }
}

/// Run the command as a guarded call and return the exit status to pass
/// through.
pub async fn run(args: RunArgs) -> anyhow::Result<u8> {
    let store = open_store(&args.storage)?;
    let store_type = store.name().to_string();
    let (policy, presets) = args.policy(&store_type)?;
    let locker = Locker::new(StoreRegistry::new().with(store_type, store)).with_presets(presets);

    let method = args.method();
    let call_args = args.call_args();
    let (program, rest) = args
        .command
        .split_first()
        .context("no command given")?;

    let outcome: anyhow::Result<std::process::ExitStatus> = locker
        .invoke(&policy, &call_args, &method, || async {
            tracing::info!(command = %program, "Running guarded command");
            let status = tokio::process::Command::new(program)
                .args(rest)
                .kill_on_drop(true)
                .status()
                .await
                .with_context(|| format!("failed to start `{program}`"))?;
            Ok(status)
        })
        .await;

    match outcome {
        Ok(status) => {
            // killed by a signal, or out of range: report a plain failure
            let code = status.code().unwrap_or(1);
            Ok(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => match e.downcast_ref::<DistributedLockError>() {
            Some(lock_err) => {
                tracing::error!(error = %lock_err, "Command not run");
                eprintln!("latchkey: {e:#}");
                Ok(LOCK_FAILED_EXIT)
            }
            None => Err(e),
        },
    }
}
