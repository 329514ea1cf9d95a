//! End-to-end behaviour of the worker pool through its public API.
//!
//! Verifies:
//! - Duplicate submissions collapse into one handler call
//! - A key is never handled by two workers at once
//! - Failures back off, hit the retry ceiling and are dropped
//! - Delayed submissions stay hidden until their release time
//! - Shutdown lets in-flight and ready work finish before the workers exit

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconq_queue::{
    async_trait, CancellationToken, Handler, Outcome, WorkerPool, WorkerPoolConfig,
};
use tokio::time::Instant;

type Script = Box<dyn Fn(&str, usize) -> Outcome + Send + Sync>;

/// Handler that records every invocation and answers from a script.
struct Probe {
    calls: Mutex<Vec<(&'static str, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    work: Duration,
    script: Script,
}

impl Probe {
    fn new(
        work: Duration,
        script: impl Fn(&str, usize) -> Outcome + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            work,
            script: Box::new(script),
        })
    }

    fn calls_for(&self, key: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, at)| *at)
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Lets tests keep a handle on the probe after handing it to the pool.
struct Shared(Arc<Probe>);

#[async_trait]
impl Handler<&'static str> for Shared {
    async fn handle(&self, key: &&'static str) -> Outcome {
        let probe = &self.0;
        let attempt = {
            let mut calls = probe.calls.lock().unwrap();
            calls.push((*key, Instant::now()));
            calls.iter().filter(|(k, _)| k == key).count()
        };

        let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !probe.work.is_zero() {
            tokio::time::sleep(probe.work).await;
        }
        probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        (probe.script)(*key, attempt)
    }
}

fn config(concurrency: usize, max_retries: u32) -> WorkerPoolConfig {
    WorkerPoolConfig::default()
        .with_name("test-pool")
        .with_concurrency(concurrency)
        .with_max_retries(max_retries)
        .with_backoff(Duration::from_millis(100), Duration::from_secs(10))
        .with_delay_promotion_interval(Duration::from_millis(10))
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn duplicate_submissions_are_handled_once() {
    let probe = Probe::new(Duration::ZERO, |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(4, 3)).unwrap();

    pool.submit("a");
    pool.submit("a");
    pool.submit("a");
    pool.start(Shared(probe.clone()), 4, CancellationToken::new()).unwrap();

    wait_until(|| pool.stats().processed >= 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(probe.calls_for("a").len(), 1);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn same_key_is_never_handled_concurrently() {
    let probe = Probe::new(Duration::from_millis(50), |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(4, 3)).unwrap();
    pool.start(Shared(probe.clone()), 4, CancellationToken::new()).unwrap();

    pool.submit("k");
    wait_until(|| probe.in_flight.load(Ordering::SeqCst) == 1).await;

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let q = pool.queue().clone();
            tokio::spawn(async move { q.add("k") })
        })
        .collect();
    for s in submitters {
        s.await.unwrap();
    }

    wait_until(|| pool.stats().processed >= 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    // The first run plus exactly one re-run for all the overlapping submits.
    assert_eq!(probe.calls_for("k").len(), 2);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_run_in_parallel() {
    let probe = Probe::new(Duration::from_millis(50), |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(3, 3)).unwrap();
    pool.start(Shared(probe.clone()), 3, CancellationToken::new()).unwrap();

    for key in ["a", "b", "c"] {
        pool.submit(key);
    }
    wait_until(|| pool.stats().processed >= 3).await;

    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 3);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_monotonically() {
    let probe = Probe::new(Duration::ZERO, |_, attempt| {
        if attempt < 5 {
            Outcome::failure(format!("attempt {attempt} failed"))
        } else {
            Outcome::Success
        }
    });
    let pool = WorkerPool::new(config(1, 10)).unwrap();
    pool.start(Shared(probe.clone()), 1, CancellationToken::new()).unwrap();

    pool.submit("a");
    wait_until(|| pool.stats().succeeded == 1).await;
    assert_eq!(pool.queue().num_requeues(&"a"), 0, "success resets the counter");

    let calls = probe.calls_for("a");
    let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [100, 200, 400, 800].map(Duration::from_millis);
    for (gap, min) in gaps.iter().zip(expected) {
        assert!(*gap >= min, "gap {gap:?} shorter than backoff {min:?}");
    }
    for w in gaps.windows(2) {
        assert!(w[1] >= w[0], "backoff shrank: {gaps:?}");
    }

    let stats = pool.stats();
    assert_eq!((stats.failed, stats.requeued, stats.dropped), (4, 4, 0));
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_drops_key_after_max_failures() {
    let probe = Probe::new(Duration::ZERO, |_, _| Outcome::failure("always"));
    let pool = WorkerPool::new(config(2, 3)).unwrap();
    pool.start(Shared(probe.clone()), 2, CancellationToken::new()).unwrap();

    pool.submit("a");
    wait_until(|| pool.queue().num_requeues(&"a") == 3).await;
    assert_eq!(pool.stats().dropped, 0);

    wait_until(|| pool.stats().dropped == 1).await;

    // Long enough for any leftover retry to have fired.
    tokio::time::sleep(Duration::from_secs(60)).await;
    // The first attempt plus three retries.
    assert_eq!(probe.calls_for("a").len(), 4);
    assert_eq!(pool.stats().requeued, 3);
    assert_eq!(pool.queue().num_requeues(&"a"), 0);
    let stats = pool.queue().stats();
    assert_eq!((stats.ready, stats.processing, stats.delayed), (0, 0, 0));

    // A fresh external submit starts a new cycle.
    pool.submit("a");
    wait_until(|| probe.calls_for("a").len() == 5).await;
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn delayed_submission_is_hidden_until_due() {
    let probe = Probe::new(Duration::ZERO, |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(1, 3)).unwrap();
    pool.start(Shared(probe.clone()), 1, CancellationToken::new()).unwrap();

    let submitted = Instant::now();
    pool.submit_after("a", Duration::from_secs(5));

    tokio::time::sleep(Duration::from_millis(4990)).await;
    assert_eq!(probe.total_calls(), 0);

    wait_until(|| probe.total_calls() == 1).await;
    assert!(probe.calls_for("a")[0] - submitted >= Duration::from_secs(5));
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn success_with_long_delay_reruns_key() {
    let probe = Probe::new(Duration::ZERO, |_, attempt| {
        if attempt == 1 {
            Outcome::SuccessWithDelay(Duration::from_secs(30))
        } else {
            Outcome::Success
        }
    });
    let pool = WorkerPool::new(config(1, 3)).unwrap();
    pool.start(Shared(probe.clone()), 1, CancellationToken::new()).unwrap();

    pool.submit("a");
    wait_until(|| probe.calls_for("a").len() == 2).await;

    let calls = probe.calls_for("a");
    assert!(calls[1] - calls[0] >= Duration::from_secs(30));
    assert_eq!(pool.stats().delayed, 1);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_in_flight_work() {
    let probe = Probe::new(Duration::from_millis(200), |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(3, 3)).unwrap();
    pool.start(Shared(probe.clone()), 3, CancellationToken::new()).unwrap();

    for key in ["a", "b", "c", "d", "e"] {
        pool.submit(key);
    }
    wait_until(|| probe.in_flight.load(Ordering::SeqCst) == 3).await;

    pool.shutdown().await;

    // In-flight keys finished and the two still waiting were drained too.
    let stats = pool.stats();
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.running, 0);
    assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(probe.total_calls(), 5);

    assert_eq!(pool.queue().get().await, None);
    pool.submit("f");
    assert!(pool.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_delayed_keys() {
    let probe = Probe::new(Duration::ZERO, |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(1, 3)).unwrap();
    pool.start(Shared(probe.clone()), 1, CancellationToken::new()).unwrap();

    pool.submit_after("later", Duration::from_secs(5));
    pool.shutdown().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.total_calls(), 0);
    assert_eq!(pool.queue().stats().delayed, 0);
}

#[tokio::test(start_paused = true)]
async fn unbounded_delays_are_parked_not_fatal() {
    let probe = Probe::new(Duration::ZERO, |key, _| {
        if key == "forever" {
            Outcome::SuccessWithDelay(Duration::MAX)
        } else {
            Outcome::Success
        }
    });
    let pool = WorkerPool::new(config(1, 3)).unwrap();
    pool.start(Shared(probe.clone()), 1, CancellationToken::new()).unwrap();

    pool.submit("forever");
    pool.submit_after("never", Duration::MAX);
    wait_until(|| pool.stats().processed == 1).await;

    // The single worker survived and still serves new keys.
    pool.submit("next");
    wait_until(|| probe.calls_for("next").len() == 1).await;

    let stats = pool.queue().stats();
    assert_eq!((stats.processing, stats.delayed), (0, 2));
    assert_eq!(pool.stats().running, 0);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_lifetime_stops_workers() {
    let probe = Probe::new(Duration::from_millis(100), |_, _| Outcome::Success);
    let pool = WorkerPool::new(config(2, 3)).unwrap();
    let lifetime = CancellationToken::new();
    pool.start(Shared(probe.clone()), 2, lifetime.clone()).unwrap();

    pool.submit("a");
    wait_until(|| probe.in_flight.load(Ordering::SeqCst) == 1).await;

    lifetime.cancel();
    wait_until(|| pool.queue().is_shutting_down()).await;
    pool.shutdown().await;

    assert_eq!(pool.stats().processed, 1);
    assert_eq!(probe.total_calls(), 1);
}

#[tokio::test]
async fn handler_can_be_a_closure() {
    let seen = Arc::new(AtomicUsize::new(0));
    let pool: WorkerPool<u64> = WorkerPool::new(config(2, 3)).unwrap();

    let counter = Arc::clone(&seen);
    pool.start(
        move |key: u64| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(key as usize, Ordering::SeqCst);
                Outcome::Success
            }
        },
        2,
        CancellationToken::new(),
    )
    .unwrap();

    for key in 1..=10 {
        pool.submit(key);
    }
    wait_until(|| pool.stats().processed == 10).await;

    assert_eq!(seen.load(Ordering::SeqCst), 55);
    pool.shutdown().await;
}
