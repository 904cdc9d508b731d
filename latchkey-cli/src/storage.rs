use std::sync::Arc;

use anyhow::bail;
#[cfg(feature = "sqlite")]
use anyhow::Context;

use latchkey_core::infrastructure::LockStore;
use latchkey_core::infrastructure_in_memory::InMemoryLockStore;

// ─── Storage Backend Selection ──────────────────────────────────────────────

/// `memory` or `sqlite:<path>`.
pub fn open_store(storage: &str) -> anyhow::Result<Arc<dyn LockStore>> {
    if storage == "memory" {
        tracing::info!("💾 Storage backend: in-memory (locks are local to this process)");
        Ok(Arc::new(InMemoryLockStore::new()))
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!("💾 Storage backend: SQLite ({})", path);
            let store = latchkey_core::infrastructure_sqlite::SqliteLockStore::open(path)
                .with_context(|| format!("failed to open SQLite lock database at '{path}'"))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = path;
            bail!(
                "SQLite storage requested but the `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
            )
        }
    } else {
        bail!("unknown storage backend '{storage}'. Use 'memory' or 'sqlite:<path>'")
    }
}
