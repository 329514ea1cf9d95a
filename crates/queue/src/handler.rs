//! Caller-supplied job handler contract.

use std::future::Future;

use async_trait::async_trait;

use crate::types::Outcome;

/// Work executed for one key.
///
/// The queue only carries keys; a handler resolves whatever payload it needs
/// from its own store. The returned [`Outcome`] is the only signal the worker
/// pool reads, so errors must be reported as [`Outcome::Failure`].
///
/// Handlers are not cancelled when the pool shuts down. Long-running handlers
/// should watch their own cancellation signal.
#[async_trait]
pub trait Handler<K>: Send + Sync + 'static {
    async fn handle(&self, key: &K) -> Outcome;
}

#[async_trait]
impl<K, F, Fut> Handler<K> for F
where
    K: Clone + Send + Sync + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn handle(&self, key: &K) -> Outcome {
        (self)(key.clone()).await
    }
}
