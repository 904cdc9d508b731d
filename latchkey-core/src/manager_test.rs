#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::infrastructure::LockStore;
    use crate::infrastructure_in_memory::InMemoryLockStore;
    use crate::manager::{AcquireError, LockManager};
    use crate::testing::{Call, ReleaseStep, ScriptedStore, Step, TOKEN};
    use crate::types::{LockKeySpec, LockToken, RetryPolicy};

    const LEASE: Duration = Duration::from_millis(5000);

    fn spec(keys: &[&str]) -> LockKeySpec {
        LockKeySpec::new(keys.iter().map(|k| k.to_string()), "lock").unwrap()
    }

    fn retry(interval_ms: u64, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_first_attempt() {
        let store = ScriptedStore::granting();
        let lock = LockManager::new()
            .acquire(&store, &spec(&["lock:a", "lock:b"]), LEASE, retry(50, 200))
            .await
            .unwrap();

        assert_eq!(lock.attempts, 1);
        assert_eq!(lock.token, LockToken::from_issued(TOKEN));
        // the whole group goes to the store in one call
        assert_eq!(
            store.calls(),
            vec![Call::Acquire {
                keys: vec!["lock:a".into(), "lock:b".into()],
                store_id: "lock".into(),
                lease: LEASE,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_is_single_attempt() {
        let store = ScriptedStore::denying();
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(50, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::TimedOut(ref t) if t.attempts == 1));
        assert_eq!(store.acquire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_granted() {
        let store = ScriptedStore::granting().then([Step::Deny, Step::Deny, Step::Deny]);
        let started = Instant::now();
        let lock = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(50, 200))
            .await
            .unwrap();

        assert_eq!(lock.attempts, 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150) && waited < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_attempt_after_deadline() {
        let store = ScriptedStore::denying();
        let started = Instant::now();
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(50, 200))
            .await
            .unwrap_err();

        // attempts at 0, 50, 100, 150; the wake-up at 200 is past the deadline
        match err {
            AcquireError::TimedOut(t) => {
                assert_eq!(t.attempts, 4);
                assert_eq!(t.keys, vec!["a".to_string()]);
                assert_eq!(t.timeout, Duration::from_millis(200));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(store.acquire_count(), 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(200) && waited < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_last_wait_short() {
        let store = ScriptedStore::denying();
        let started = Instant::now();
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(500, 100))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::TimedOut(ref t) if t.attempts == 1));
        assert_eq!(store.acquire_count(), 1);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited < Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_mid_interval_gets_no_extra_attempt() {
        let store = ScriptedStore::denying();
        let started = Instant::now();
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(80, 200))
            .await
            .unwrap_err();

        // attempts at 0, 80, 160; the wait after 160 ends on the deadline
        assert!(matches!(err, AcquireError::TimedOut(ref t) if t.attempts == 3));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(200) && waited < Duration::from_millis(210));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_counts_from_before_the_store_call() {
        let store = ScriptedStore::granting().with_latency(Duration::from_millis(30));
        let started = Instant::now();
        let lock = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(50, 0))
            .await
            .unwrap();

        // the store took 30ms; the lease it recorded started before that
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(lock.expires_at, started + LEASE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_error_aborts_retry_loop() {
        let store = ScriptedStore::granting().then([Step::Deny, Step::Fail]);
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, retry(50, 10_000))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::Store(_)));
        assert_eq!(store.acquire_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_is_called_once() {
        let store = ScriptedStore::failing();
        let err = LockManager::new()
            .acquire(&store, &spec(&["a"]), LEASE, RetryPolicy::single_attempt())
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::Store(_)));
        assert_eq!(store.acquire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_never_fails() {
        let manager = LockManager::new();
        for (step, expected) in [
            (ReleaseStep::Release, true),
            (ReleaseStep::AlreadyGone, false),
            (ReleaseStep::Fail, false),
        ] {
            let store = ScriptedStore::granting().release_with(step);
            let lock = manager
                .acquire(&store, &spec(&["a"]), LEASE, retry(50, 0))
                .await
                .unwrap();
            assert_eq!(manager.release(&store, &lock).await, expected);
            assert_eq!(store.releases(), vec![(vec!["a".to_string()], lock.token.clone())]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_until_aborted() {
        let store = Arc::new(ScriptedStore::granting());
        let manager = LockManager::new();
        let lock = manager
            .acquire(store.as_ref(), &spec(&["a"]), LEASE, retry(50, 0))
            .await
            .unwrap();

        let handle = manager.spawn_refresh(
            store.clone() as Arc<dyn LockStore>,
            &lock,
            LEASE,
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.abort();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let extends = store
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Extend { .. }))
            .count();
        assert_eq!(extends, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_acquires_after_holder_releases() {
        let store = Arc::new(InMemoryLockStore::new());
        let manager = LockManager::new();
        let key = spec(&["lock:X"]);

        let first = manager
            .acquire(store.as_ref(), &key, LEASE, retry(50, 200))
            .await
            .unwrap();

        let holder = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                LockManager::new().release(store.as_ref(), &first).await
            })
        };

        let second = manager
            .acquire(store.as_ref(), &key, LEASE, retry(50, 200))
            .await
            .unwrap();
        assert!(holder.await.unwrap());
        // tried at 0, 50, 100 while held; got it at 150
        assert_eq!(second.attempts, 4);
        assert!(manager.release(store.as_ref(), &second).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_times_out_while_holder_works() {
        let store = InMemoryLockStore::new();
        let manager = LockManager::new();
        let key = spec(&["lock:X"]);

        let first = manager.acquire(&store, &key, LEASE, retry(50, 200)).await.unwrap();
        let err = manager
            .acquire(&store, &key, LEASE, retry(50, 200))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::TimedOut(_)));
        assert!(manager.release(&store, &first).await);
    }
}
