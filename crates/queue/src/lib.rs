//! `reconq-queue`: retrying job dispatch for event-driven reconciliation.
//!
//! ## Design
//!
//! - Work is identified by a key; the queue never holds more than one pending
//!   unit of work per key
//! - A key is handled by at most one worker at a time
//! - Failures are retried with per-key exponential backoff up to a ceiling
//! - Handlers may ask to be re-run after an explicit delay
//! - Shutdown lets in-flight work finish, then stops the workers
//!
//! ## Components
//!
//! - `DelayScheduler`: time-ordered holding area for deferred keys
//! - `RateLimiter`: per-key failure counters and backoff delays
//! - `JobQueue`: ready/processing/delayed bookkeeping with deduplication
//! - `Handler`: caller-supplied work for one key
//! - `WorkerPool`: concurrent workers routing handler outcomes back into the queue

pub mod config;
pub mod delay;
pub mod error;
pub mod handler;
pub mod pool;
pub mod queue;
pub mod rate_limiter;
pub mod types;

pub use config::WorkerPoolConfig;
pub use delay::DelayScheduler;
pub use error::{ConfigError, PoolError};
pub use handler::Handler;
pub use pool::{Routed, WorkerPool};
pub use queue::JobQueue;
pub use rate_limiter::RateLimiter;
pub use types::{BackoffStrategy, Outcome, PoolStats, QueueStats, RetryPolicy};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
