//! Controller wired to a real worker pool.

use std::sync::Arc;
use std::time::Duration;

use reconq_controller::{
    AnnotateReconciler, InMemoryResourceStore, ObjectKey, RECONCILED_ANNOTATION, Resource,
    ResourceStore,
};
use reconq_queue::{CancellationToken, WorkerPool, WorkerPoolConfig};

fn annotated(store: &InMemoryResourceStore, key: &ObjectKey) -> bool {
    store
        .get(key)
        .map(|r| r.annotations.contains_key(RECONCILED_ANNOTATION))
        .unwrap_or(false)
}

#[tokio::test(start_paused = true)]
async fn annotates_every_submitted_object() {
    let store = Arc::new(InMemoryResourceStore::new());
    for i in 0..20 {
        store.insert(Resource::new(ObjectKey::new("default", format!("pod-{i}"))));
    }

    let config = WorkerPoolConfig::default()
        .with_name("pods")
        .with_concurrency(4)
        .with_delay_promotion_interval(Duration::from_millis(10));
    let pool = WorkerPool::new(config).unwrap();
    pool.start(
        AnnotateReconciler::new(Arc::clone(&store)),
        4,
        CancellationToken::new(),
    )
    .unwrap();

    for key in store.keys() {
        pool.submit(key.clone());
        pool.submit(key);
    }
    // A key that was deleted before it got reconciled.
    pool.submit(ObjectKey::new("default", "deleted"));

    tokio::time::timeout(Duration::from_secs(30), async {
        while pool.stats().processed < 21 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    pool.shutdown().await;

    for key in store.keys() {
        assert!(annotated(&store, &key), "{key} not annotated");
        assert_eq!(store.get(&key).unwrap().resource_version, 1);
    }
    let stats = pool.stats();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.succeeded, stats.processed);
}

#[tokio::test(start_paused = true)]
async fn cancelling_stops_the_controller() {
    let store = Arc::new(InMemoryResourceStore::new());
    let pool: WorkerPool<ObjectKey> = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
    let lifetime = CancellationToken::new();
    pool.start(AnnotateReconciler::new(Arc::clone(&store)), 2, lifetime.clone())
        .unwrap();

    lifetime.cancel();
    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .unwrap();

    pool.submit(ObjectKey::new("default", "late"));
    assert!(pool.queue().is_empty());
}
