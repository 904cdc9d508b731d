//! SQLite-backed LockStore implementation.
//! Several processes sharing one database file get mutual exclusion
//! across processes, and held locks survive restarts until their lease ends.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! latchkey-core = { path = "../latchkey-core", features = ["sqlite"] }
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::infrastructure::{LockStore, StoreError};
use crate::types::LockToken;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn lease_ms(lease: Duration) -> i64 {
    i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}

/// A persistent lock store backed by SQLite.
///
/// Every operation runs in one `IMMEDIATE` transaction on the blocking pool,
/// which gives the all-or-nothing group semantics across processes.
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL lets readers proceed while another process holds the write lock
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                store_id    TEXT NOT NULL,
                lock_key    TEXT NOT NULL,
                token       TEXT NOT NULL,
                expires_at  INTEGER NOT NULL,
                PRIMARY KEY (store_id, lock_key)
            );
            CREATE INDEX IF NOT EXISTS idx_locks_token ON locks(token);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Delete rows whose lease has run out. Returns the number removed.
    pub async fn evict_expired(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM locks WHERE expires_at <= ?1", params![now_ms()])?;
            Ok(removed)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn acquire(
        &self,
        keys: &[String],
        store_id: &str,
        lease: Duration,
    ) -> Result<Option<LockToken>, StoreError> {
        let keys = keys.to_vec();
        let store_id = store_id.to_string();
        self.with_conn(move |conn| {
            let now = now_ms();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            for key in &keys {
                let expires_at: Option<i64> = tx
                    .query_row(
                        "SELECT expires_at FROM locks WHERE store_id = ?1 AND lock_key = ?2",
                        params![store_id, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if expires_at.is_some_and(|at| at > now) {
                    // dropping the transaction rolls it back
                    return Ok(None);
                }
            }

            let token = LockToken::generate();
            let expires_at = now.saturating_add(lease_ms(lease));
            for key in &keys {
                tx.execute(
                    "INSERT INTO locks (store_id, lock_key, token, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(store_id, lock_key) DO UPDATE SET
                        token = excluded.token,
                        expires_at = excluded.expires_at",
                    params![store_id, key, token.as_str(), expires_at],
                )?;
            }
            tx.commit()?;
            Ok(Some(token))
        })
        .await
    }

    async fn release(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
    ) -> Result<bool, StoreError> {
        let keys = keys.to_vec();
        let token = token.clone();
        let store_id = store_id.to_string();
        self.with_conn(move |conn| {
            let now = now_ms();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut released = 0;
            for key in &keys {
                released += tx.execute(
                    "DELETE FROM locks
                     WHERE store_id = ?1 AND lock_key = ?2 AND token = ?3 AND expires_at > ?4",
                    params![store_id, key, token.as_str(), now],
                )?;
                // our own expired rows go too, but do not count
                tx.execute(
                    "DELETE FROM locks WHERE store_id = ?1 AND lock_key = ?2 AND token = ?3",
                    params![store_id, key, token.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(released == keys.len())
        })
        .await
    }

    async fn extend(
        &self,
        keys: &[String],
        token: &LockToken,
        store_id: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let keys = keys.to_vec();
        let token = token.clone();
        let store_id = store_id.to_string();
        self.with_conn(move |conn| {
            let now = now_ms();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            for key in &keys {
                let live: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM locks
                     WHERE store_id = ?1 AND lock_key = ?2 AND token = ?3 AND expires_at > ?4",
                    params![store_id, key, token.as_str(), now],
                    |row| row.get(0),
                )?;
                if live == 0 {
                    return Ok(false);
                }
            }

            let expires_at = now.saturating_add(lease_ms(lease));
            for key in &keys {
                tx.execute(
                    "UPDATE locks SET expires_at = ?1
                     WHERE store_id = ?2 AND lock_key = ?3 AND token = ?4",
                    params![expires_at, store_id, key, token.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }
}
