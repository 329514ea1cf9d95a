//! Deduplicating, delay-aware, rate-limited job queue.
//!
//! ## Key states
//!
//! Every tracked key sits in exactly one slot:
//!
//! ```text
//!   add ──► Ready ──get──► Processing ──done──► (untracked)
//!             ▲                 │
//!             │                 └─ add/add_after while processing: remembered,
//!             │                    applied once on `done`
//!             └──promote── Delayed ◄── add_after / add_rate_limited
//! ```
//!
//! A second `add` for a key that is ready is a no-op, and a key that is being
//! processed is never handed to another worker until `done` is called for it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::delay::DelayScheduler;
use crate::rate_limiter::RateLimiter;
use crate::types::{QueueStats, RetryPolicy};

/// Superseded heap entries tolerated before the heap is compacted.
const COMPACT_THRESHOLD: usize = 64;

/// Release time for `delay` from `now`, saturating far in the future.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    // Roughly 30 years; tokio clamps its own timers the same way.
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Re-admission requested while a key was being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readmit {
    Now,
    At(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ready,
    Processing { readmit: Option<Readmit> },
    Delayed { deadline: Instant, seq: u64 },
}

#[derive(Debug)]
struct QueueState<K> {
    slots: HashMap<K, Slot>,
    ready: VecDeque<K>,
    delayed: DelayScheduler<K>,
    limiter: RateLimiter<K>,
    /// Heap entries whose key has since left the delayed slot
    stale: usize,
    shutting_down: bool,
    adds: u64,
    retries: u64,
}

impl<K> QueueState<K>
where
    K: Clone + Eq + Hash,
{
    fn push_ready(&mut self, key: K) {
        let prev = self.slots.insert(key.clone(), Slot::Ready);
        self.ready.push_back(key);
        self.adds += 1;
        self.note_superseded(prev);
    }

    fn push_delayed(&mut self, key: K, deadline: Instant) {
        let seq = self.delayed.schedule(key.clone(), deadline);
        let prev = self.slots.insert(key, Slot::Delayed { deadline, seq });
        self.note_superseded(prev);
    }

    fn note_superseded(&mut self, prev: Option<Slot>) {
        if !matches!(prev, Some(Slot::Delayed { .. })) {
            return;
        }
        self.stale += 1;
        if self.stale >= COMPACT_THRESHOLD && self.stale * 2 >= self.delayed.len() {
            self.compact();
        }
    }

    /// Drop heap entries that no longer match their key's delayed slot.
    fn compact(&mut self) {
        let slots = &self.slots;
        self.delayed.retain(|key, seq| {
            matches!(slots.get(key), Some(Slot::Delayed { seq: current, .. }) if *current == seq)
        });
        self.stale = 0;
    }

    /// Returns true when the key became ready.
    fn add(&mut self, key: K) -> bool {
        if self.shutting_down {
            return false;
        }

        match self.slots.get_mut(&key) {
            Some(Slot::Ready) => false,
            Some(Slot::Processing { readmit }) => {
                *readmit = Some(Readmit::Now);
                false
            }
            Some(Slot::Delayed { .. }) | None => {
                self.push_ready(key);
                true
            }
        }
    }

    /// Returns true when the key became ready.
    fn add_at(&mut self, key: K, deadline: Instant, now: Instant) -> bool {
        if self.shutting_down {
            return false;
        }
        if deadline <= now {
            return self.add(key);
        }

        match self.slots.get_mut(&key) {
            Some(Slot::Ready) => {}
            Some(Slot::Processing { readmit }) => match *readmit {
                Some(Readmit::Now) => {}
                Some(Readmit::At(at)) if at <= deadline => {}
                _ => *readmit = Some(Readmit::At(deadline)),
            },
            Some(Slot::Delayed { deadline: at, .. }) if *at <= deadline => {}
            Some(Slot::Delayed { .. }) | None => self.push_delayed(key, deadline),
        }
        false
    }

    fn pop_ready(&mut self) -> Option<K> {
        while let Some(key) = self.ready.pop_front() {
            if let Some(slot) = self.slots.get_mut(&key) {
                if *slot == Slot::Ready {
                    *slot = Slot::Processing { readmit: None };
                    return Some(key);
                }
            }
        }
        None
    }

    /// Returns true when the key became ready.
    fn done(&mut self, key: &K, now: Instant) -> bool {
        let readmit = match self.slots.get(key) {
            Some(Slot::Processing { readmit }) => *readmit,
            _ => return false,
        };
        self.slots.remove(key);

        if self.shutting_down {
            return false;
        }
        match readmit {
            None => false,
            Some(Readmit::Now) => {
                self.push_ready(key.clone());
                true
            }
            Some(Readmit::At(deadline)) if deadline <= now => {
                self.push_ready(key.clone());
                true
            }
            Some(Readmit::At(deadline)) => {
                self.push_delayed(key.clone(), deadline);
                false
            }
        }
    }

    fn promote_due(&mut self, now: Instant) -> usize {
        if self.shutting_down {
            return 0;
        }

        let mut promoted = 0;
        while let Some((key, seq)) = self.delayed.pop_due(now) {
            match self.slots.get(&key) {
                Some(Slot::Delayed { seq: current, .. }) if *current == seq => {
                    // Its heap entry is gone, so this is not a supersede.
                    self.slots.remove(&key);
                    self.push_ready(key);
                    promoted += 1;
                }
                // Superseded by an earlier reschedule or an immediate add.
                _ => self.stale = self.stale.saturating_sub(1),
            }
        }
        promoted
    }

    /// Ready keys stay available for `get`; delayed keys and pending
    /// re-admissions are dropped.
    fn shut_down(&mut self) {
        self.shutting_down = true;
        self.delayed.clear();
        self.stale = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Ready => true,
            Slot::Processing { readmit } => {
                *readmit = None;
                true
            }
            Slot::Delayed { .. } => false,
        });
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            adds: self.adds,
            retries: self.retries,
            failing: self.limiter.len(),
            ..Default::default()
        };
        for slot in self.slots.values() {
            match slot {
                Slot::Ready => stats.ready += 1,
                Slot::Processing { .. } => stats.processing += 1,
                Slot::Delayed { .. } => stats.delayed += 1,
            }
        }
        stats
    }
}

#[derive(Debug)]
struct Inner<K> {
    name: String,
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

/// Shared work queue keyed by `K`.
///
/// This struct is cheap to clone and is safe to share across tasks. All
/// bookkeeping happens under one internal lock; [`JobQueue::get`] is the only
/// operation that waits.
#[derive(Debug)]
pub struct JobQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for JobQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> JobQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState {
                    slots: HashMap::new(),
                    ready: VecDeque::new(),
                    delayed: DelayScheduler::new(),
                    limiter: RateLimiter::new(policy),
                    stale: 0,
                    shutting_down: false,
                    adds: 0,
                    retries: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `key` available to workers now.
    ///
    /// No-op if the key is already ready. If it is being processed, it is
    /// re-added once when the current worker calls [`JobQueue::done`].
    pub fn add(&self, key: K) {
        if self.lock().add(key) {
            self.inner.notify.notify_one();
        }
    }

    /// Make `key` available to workers once `delay` has elapsed.
    ///
    /// Keeps whichever release time is earlier if the key is already tracked.
    pub fn add_after(&self, key: K, delay: Duration) {
        let now = Instant::now();
        let became_ready = self.lock().add_at(key, deadline_after(now, delay), now);
        if became_ready {
            self.inner.notify.notify_one();
        }
    }

    /// Count a failure for `key` and re-add it after the resulting backoff.
    pub fn add_rate_limited(&self, key: K) {
        let now = Instant::now();
        let became_ready = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let delay = state.limiter.when(&key);
            state.retries += 1;
            state.add_at(key, deadline_after(now, delay), now)
        };
        if became_ready {
            self.inner.notify.notify_one();
        }
    }

    /// Wait for the next ready key and mark it as processing.
    ///
    /// Keys that were ready before [`JobQueue::shut_down`] are still handed
    /// out; `None` means the queue is shut down and nothing is left.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent add cannot slip
            // between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.pop_ready() {
                    if !state.ready.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing.
    pub fn done(&self, key: &K) {
        if self.lock().done(key, Instant::now()) {
            self.inner.notify.notify_one();
        }
    }

    /// Reset the failure counter for `key`.
    pub fn forget(&self, key: &K) {
        self.lock().limiter.forget(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().limiter.num_requeues(key)
    }

    /// Move every delayed key whose release time has passed into the ready set.
    pub fn promote_due(&self) -> usize {
        let promoted = self.lock().promote_due(Instant::now());
        for _ in 0..promoted {
            self.inner.notify.notify_one();
        }
        promoted
    }

    /// Close the queue and wake every waiting [`JobQueue::get`].
    ///
    /// Ready keys can still be taken; delayed keys are discarded and later
    /// adds are ignored.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shut_down();
        }
        info!(queue = %self.inner.name, "job queue shutting down");
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys ready for pickup.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats()
    }

    /// Spawn the background task that promotes due delayed keys every `interval`.
    ///
    /// Cancelling `lifetime` shuts the queue down; the task also exits on its
    /// own once the queue has been shut down some other way.
    pub fn spawn_promoter(&self, interval: Duration, lifetime: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(queue = %queue.name(), ?interval, "delay promoter started");

            loop {
                tokio::select! {
                    _ = lifetime.cancelled() => {
                        queue.shut_down();
                        break;
                    }
                    _ = ticker.tick() => {
                        if queue.is_shutting_down() {
                            break;
                        }
                        let promoted = queue.promote_due();
                        if promoted > 0 {
                            debug!(queue = %queue.name(), promoted, "promoted delayed keys");
                        }
                    }
                }
            }

            debug!(queue = %queue.name(), "delay promoter stopped");
        })
    }
}
