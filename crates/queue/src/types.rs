//! Core job types and policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of one handler invocation.
#[derive(Debug)]
pub enum Outcome {
    /// Work completed; the key's failure counter is reset.
    Success,
    /// Work failed and should be retried with backoff.
    Failure(anyhow::Error),
    /// No error, but run the key again after the given delay.
    SuccessWithDelay(Duration),
}

impl Outcome {
    /// Build a failure from a plain message.
    pub fn failure(message: impl std::fmt::Display) -> Self {
        Self::Failure(anyhow::anyhow!("{message}"))
    }

    /// Map a reconcile-style result onto an outcome.
    ///
    /// `Ok(None)` is a plain success, `Ok(Some(d))` asks to be re-run after `d`.
    pub fn from_result<E>(result: Result<Option<Duration>, E>) -> Self
    where
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(None) => Self::Success,
            Ok(Some(delay)) => Self::SuccessWithDelay(delay),
            Err(err) => Self::Failure(err.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(failures - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * failures
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive failures after which a key is dropped
    pub max_retries: u32,
    /// Delay used for the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that drops a key on its first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Calculate the delay after `failures` consecutive failures (1-indexed).
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
            }
            BackoffStrategy::Linear => self
                .base_delay
                .checked_mul(failures)
                .unwrap_or(self.max_delay),
        };

        delay.min(self.max_delay)
    }

    /// Check if a key already requeued `requeues` times may be requeued again.
    pub fn should_retry(&self, requeues: u32) -> bool {
        requeues < self.max_retries
    }
}

/// Point-in-time view of a [`JobQueue`](crate::JobQueue).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Keys waiting to be picked up
    pub ready: usize,
    /// Keys currently held by a worker
    pub processing: usize,
    /// Keys waiting for their release time
    pub delayed: usize,
    /// Total admissions to the ready set
    pub adds: u64,
    /// Total rate-limited requeues
    pub retries: u64,
    /// Keys with a non-zero failure counter
    pub failing: usize,
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub requeued: u64,
    pub delayed: u64,
    pub dropped: u64,
    pub running: usize,
}
