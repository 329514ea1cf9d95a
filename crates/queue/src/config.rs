//! Worker pool configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::types::{BackoffStrategy, RetryPolicy};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Name for logging
    pub name: String,
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Consecutive failures before a key is dropped
    pub max_retries: u32,
    /// First retry delay
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Requested delays at or below this are treated as plain success
    pub min_requeue_delay: Duration,
    /// How often delayed keys are checked for release
    pub delay_promotion_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            name: "default-worker-queue".to_string(),
            concurrency: 1,
            max_retries: retry.max_retries,
            base_delay: retry.base_delay,
            max_delay: retry.max_delay,
            min_requeue_delay: Duration::from_secs(7),
            delay_promotion_interval: Duration::from_millis(50),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_min_requeue_delay(mut self, delay: Duration) -> Self {
        self.min_requeue_delay = delay;
        self
    }

    pub fn with_delay_promotion_interval(mut self, interval: Duration) -> Self {
        self.delay_promotion_interval = interval;
        self
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::InvalidBackoff {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        if self.delay_promotion_interval.is_zero() {
            return Err(ConfigError::ZeroPromotionInterval);
        }
        Ok(())
    }

    /// Build a configuration from `RECONQ_*` environment variables.
    ///
    /// Missing variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            name: lookup("RECONQ_QUEUE_NAME").unwrap_or(defaults.name),
            concurrency: parse_var(&lookup, "RECONQ_CONCURRENCY").unwrap_or(defaults.concurrency),
            max_retries: parse_var(&lookup, "RECONQ_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay: parse_var(&lookup, "RECONQ_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: parse_var(&lookup, "RECONQ_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            min_requeue_delay: parse_var(&lookup, "RECONQ_MIN_REQUEUE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_requeue_delay),
            delay_promotion_interval: parse_var(&lookup, "RECONQ_PROMOTION_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_promotion_interval),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable environment variable; using default");
            None
        }
    }
}
