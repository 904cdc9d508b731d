use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use latchkey_core::infrastructure::LockStore;
use latchkey_core::infrastructure_in_memory::InMemoryLockStore;
use latchkey_core::types::MethodDescriptor;
use latchkey_core::{DistributedLockError, LockPolicy, Locker, StoreRegistry};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryLockStore::new();
    let keys = vec!["lock:bench".to_string()];

    c.bench_function("store_acquire_release_cycle", |b| {
        b.to_async(&rt).iter(|| async {
            let token = store
                .acquire(&keys, "lock", Duration::from_secs(5))
                .await
                .unwrap()
                .unwrap();
            black_box(store.release(&keys, &token, "lock").await.unwrap())
        })
    });
}

fn bench_group_size(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_group_size");

    for key_count in [1, 10, 100] {
        let store = InMemoryLockStore::new();
        let keys: Vec<String> = (0..key_count).map(|i| format!("lock:{i}")).collect();
        group.bench_with_input(BenchmarkId::new("keys", key_count), &keys, |b, keys| {
            b.to_async(&rt).iter(|| async {
                let token = store
                    .acquire(keys, "lock", Duration::from_secs(5))
                    .await
                    .unwrap()
                    .unwrap();
                black_box(store.release(keys, &token, "lock").await.unwrap())
            })
        });
    }

    group.finish();
}

fn bench_guarded_invoke(c: &mut Criterion) {
    let rt = runtime();
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let locker = Locker::new(StoreRegistry::new().with("memory", store));
    let policy = LockPolicy::builder().key("'order:' + #p0.id").build();
    let method = MethodDescriptor::new("shop::OrderService::ship").with_params(["order"]);
    let args = [json!({"id": 42})];

    c.bench_function("guarded_invoke", |b| {
        b.to_async(&rt).iter(|| async {
            let shipped: Result<u32, DistributedLockError> =
                locker.invoke(&policy, &args, &method, || async { Ok(1) }).await;
            black_box(shipped.unwrap())
        })
    });
}

criterion_group!(benches, bench_acquire_release, bench_group_size, bench_guarded_invoke);
criterion_main!(benches);
