use std::sync::Arc;

use reconq_controller::{AnnotateReconciler, InMemoryResourceStore, ObjectKey, Resource};
use reconq_observability::LogFormat;
use reconq_queue::{CancellationToken, WorkerPool, WorkerPoolConfig};

const DEFAULT_OBJECTS: &str = "default/web-0,default/web-1,kube-system/dns-0";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var("RECONQ_LOG_FORMAT")
        .ok()
        .and_then(|raw| LogFormat::parse(&raw))
        .unwrap_or_default();
    reconq_observability::init_with(format, "info");

    let config = WorkerPoolConfig::from_env();
    let concurrency = config.concurrency;

    let objects = std::env::var("RECONQ_OBJECTS").unwrap_or_else(|_| {
        tracing::warn!("RECONQ_OBJECTS not set; using demo objects");
        DEFAULT_OBJECTS.to_string()
    });

    let store = Arc::new(InMemoryResourceStore::new());
    for raw in objects.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let key: ObjectKey = raw.parse()?;
        store.insert(Resource::new(key));
    }

    let pool = WorkerPool::new(config)?;
    let lifetime = CancellationToken::new();
    pool.start(
        AnnotateReconciler::new(Arc::clone(&store)),
        concurrency,
        lifetime.clone(),
    )?;

    for key in store.keys() {
        pool.submit(key);
    }

    tracing::info!("controller running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    lifetime.cancel();
    pool.shutdown().await;

    let stats = pool.stats();
    tracing::info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        dropped = stats.dropped,
        "controller stopped"
    );
    Ok(())
}
