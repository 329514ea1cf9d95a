//! Per-key failure tracking and backoff computation.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::types::RetryPolicy;

/// Computes failure-driven requeue delays per key.
///
/// Each call to [`RateLimiter::when`] counts as one more consecutive failure
/// for that key. Counters only go back to zero through [`RateLimiter::forget`].
#[derive(Debug)]
pub struct RateLimiter<K> {
    policy: RetryPolicy,
    failures: HashMap<K, u32>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying it.
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.policy.delay_for_attempt(*failures)
    }

    /// Consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Number of keys with a non-zero failure counter.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
