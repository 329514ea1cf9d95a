//! Reconciler that marks every object it sees with an annotation.

use std::time::Duration;

use async_trait::async_trait;
use reconq_queue::{Handler, Outcome};
use tracing::{debug, info};

use crate::key::ObjectKey;
use crate::store::{ResourceStore, StoreError};

pub const RECONCILED_ANNOTATION: &str = "reconciled";
pub const RECONCILED_VALUE: &str = "true";

/// Ensures each object carries `reconciled=true`.
///
/// Objects that no longer exist are treated as done. Store errors, including
/// version conflicts, fail the attempt so the pool retries with backoff.
#[derive(Debug)]
pub struct AnnotateReconciler<S> {
    store: S,
    resync: Option<Duration>,
}

impl<S> AnnotateReconciler<S>
where
    S: ResourceStore + 'static,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            resync: None,
        }
    }

    /// Re-run every key this long after a successful pass.
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = Some(period);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One reconcile pass. `Ok(true)` means the object was updated.
    pub fn reconcile(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let mut resource = match self.store.get(key) {
            Ok(resource) => resource,
            Err(StoreError::NotFound(_)) => {
                debug!(key = %key, "object gone; nothing to reconcile");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        if resource.annotations.contains_key(RECONCILED_ANNOTATION) {
            return Ok(false);
        }

        resource
            .annotations
            .insert(RECONCILED_ANNOTATION.to_string(), RECONCILED_VALUE.to_string());
        let updated = self.store.update(resource)?;
        info!(key = %key, resource_version = updated.resource_version, "annotated object");
        Ok(true)
    }
}

#[async_trait]
impl<S> Handler<ObjectKey> for AnnotateReconciler<S>
where
    S: ResourceStore + 'static,
{
    async fn handle(&self, key: &ObjectKey) -> Outcome {
        match self.reconcile(key) {
            Ok(_) => match self.resync {
                Some(period) => Outcome::SuccessWithDelay(period),
                None => Outcome::Success,
            },
            Err(err) => Outcome::Failure(err.into()),
        }
    }
}
