//! Example reconciliation controller built on `reconq-queue`.
//!
//! Watches objects in a [`ResourceStore`], feeds their keys through a
//! [`WorkerPool`](reconq_queue::WorkerPool) and annotates each one with
//! `reconciled=true`.

pub mod key;
pub mod reconciler;
pub mod store;

pub use key::{KeyParseError, ObjectKey};
pub use reconciler::{AnnotateReconciler, RECONCILED_ANNOTATION, RECONCILED_VALUE};
pub use store::{InMemoryResourceStore, Resource, ResourceStore, StoreError};
