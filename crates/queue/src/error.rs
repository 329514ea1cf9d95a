//! Worker pool and configuration errors.

use std::time::Duration;

use thiserror::Error;

/// Invalid worker pool configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("invalid backoff bounds: base {base:?} exceeds max {max:?}")]
    InvalidBackoff { base: Duration, max: Duration },

    #[error("delay promotion interval must be non-zero")]
    ZeroPromotionInterval,
}

/// Errors surfaced by [`WorkerPool`](crate::WorkerPool) lifecycle calls.
///
/// Handler failures never show up here; they are retried or dropped inside
/// the pool and reported through logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
