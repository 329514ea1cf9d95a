//! Fixed-size worker pool draining a [`JobQueue`].

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::PoolError;
use crate::handler::Handler;
use crate::queue::JobQueue;
use crate::types::{Outcome, PoolStats, RetryPolicy};

/// What the pool did with a key after its handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Success: failure counter reset, key released
    Completed,
    /// Failure with fewer than `max_retries` requeues so far: re-added with backoff
    Requeued,
    /// Success with a delay above the threshold: re-added after that delay
    Delayed,
    /// Failure after `max_retries` requeues: counter reset, key dropped
    Dropped,
}

/// Routing rules shared by every worker.
#[derive(Debug, Clone)]
struct Router {
    name: String,
    retry: RetryPolicy,
    min_requeue_delay: Duration,
}

impl Router {
    /// Feed one handler outcome back into the queue. Does not call `done`.
    fn route<K>(&self, queue: &JobQueue<K>, key: &K, outcome: Outcome) -> Routed
    where
        K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    {
        match outcome {
            Outcome::Failure(err) => {
                let requeues = queue.num_requeues(key);
                if self.retry.should_retry(requeues) {
                    warn!(
                        pool = %self.name,
                        key = ?key,
                        error = %format!("{err:#}"),
                        retry_count = requeues,
                        "re-queuing job"
                    );
                    queue.add_rate_limited(key.clone());
                    Routed::Requeued
                } else {
                    error!(
                        pool = %self.name,
                        key = ?key,
                        error = %format!("{err:#}"),
                        max_retries = self.retry.max_retries,
                        "exceeded maximum retries; dropping job"
                    );
                    queue.forget(key);
                    Routed::Dropped
                }
            }
            Outcome::SuccessWithDelay(delay) if delay > self.min_requeue_delay => {
                debug!(pool = %self.name, key = ?key, retry_after = ?delay, "timed retry");
                queue.add_after(key.clone(), delay);
                Routed::Delayed
            }
            Outcome::SuccessWithDelay(_) | Outcome::Success => {
                debug!(pool = %self.name, key = ?key, "completed job successfully");
                queue.forget(key);
                Routed::Completed
            }
        }
    }
}

/// Bounded set of concurrent workers sharing one [`JobQueue`].
///
/// Workers pull one key at a time, run the handler, route its [`Outcome`]
/// back into the queue and release the key. Two workers never hold the same
/// key at once.
#[derive(Debug)]
pub struct WorkerPool<K> {
    config: WorkerPoolConfig,
    queue: JobQueue<K>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<Mutex<PoolStats>>,
}

impl<K> WorkerPool<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Create a pool and its queue. Workers are not running until [`WorkerPool::start`].
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let queue = JobQueue::new(config.name.clone(), config.retry_policy());

        Ok(Self {
            config,
            queue,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            stats: Arc::new(Mutex::new(PoolStats::default())),
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue<K> {
        &self.queue
    }

    /// Spawn `concurrency` workers plus the delay promoter on the current Tokio runtime.
    ///
    /// Cancelling `lifetime` shuts the queue down; workers finish the key they
    /// hold and exit. Calling `start` again while started is a no-op.
    pub fn start<H>(
        &self,
        handler: H,
        concurrency: usize,
        lifetime: CancellationToken,
    ) -> Result<(), PoolError>
    where
        H: Handler<K>,
    {
        if concurrency == 0 {
            return Err(PoolError::InvalidConcurrency);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(pool = %self.config.name, "worker pool already started");
            return Ok(());
        }

        let handler = Arc::new(handler);
        let router = Router {
            name: self.config.name.clone(),
            retry: self.config.retry_policy(),
            min_requeue_delay: self.config.min_requeue_delay,
        };

        let mut tasks = lock(&self.tasks);
        tasks.push(
            self.queue
                .spawn_promoter(self.config.delay_promotion_interval, lifetime),
        );
        for worker in 0..concurrency {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                self.queue.clone(),
                Arc::clone(&handler),
                router.clone(),
                Arc::clone(&self.stats),
            )));
        }

        info!(pool = %self.config.name, concurrency, "worker pool started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Enqueue `key` for processing.
    pub fn submit(&self, key: K) {
        self.queue.add(key);
    }

    /// Enqueue `key` for processing once `delay` has elapsed.
    pub fn submit_after(&self, key: K, delay: Duration) {
        self.queue.add_after(key, delay);
    }

    pub fn stats(&self) -> PoolStats {
        *lock(&self.stats)
    }

    /// Shut the queue down and wait for every worker to exit.
    ///
    /// Keys already being handled finish first and keys that were ready are
    /// still drained; delayed keys and later submissions are dropped.
    pub async fn shutdown(&self) {
        self.queue.shut_down();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(pool = %self.config.name, error = %err, "worker task ended abnormally");
            }
        }

        info!(pool = %self.config.name, "worker pool stopped");
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn worker_loop<K, H>(
    worker: usize,
    queue: JobQueue<K>,
    handler: Arc<H>,
    router: Router,
    stats: Arc<Mutex<PoolStats>>,
) where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    H: Handler<K>,
{
    debug!(pool = %router.name, worker, "worker started");

    while let Some(key) = queue.get().await {
        lock(&stats).running += 1;

        let outcome = invoke(&handler, &key).await;
        let failed = outcome.is_failure();
        let routed = router.route(&queue, &key, outcome);
        queue.done(&key);

        let mut s = lock(&stats);
        s.running = s.running.saturating_sub(1);
        s.processed += 1;
        if failed {
            s.failed += 1;
        } else {
            s.succeeded += 1;
        }
        match routed {
            Routed::Completed => {}
            Routed::Requeued => s.requeued += 1,
            Routed::Delayed => s.delayed += 1,
            Routed::Dropped => s.dropped += 1,
        }
    }

    debug!(pool = %router.name, worker, "worker stopped");
}

/// Run the handler in its own task so a panic is reported as a failure.
async fn invoke<K, H>(handler: &Arc<H>, key: &K) -> Outcome
where
    K: Clone + Send + Sync + 'static,
    H: Handler<K>,
{
    let handler = Arc::clone(handler);
    let key = key.clone();
    match tokio::spawn(async move { handler.handle(&key).await }).await {
        Ok(outcome) => outcome,
        Err(err) => Outcome::failure(format!("handler task failed: {err}")),
    }
}
