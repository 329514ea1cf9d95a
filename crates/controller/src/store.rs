//! Versioned object store the reconciler reads from and writes to.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::ObjectKey;

/// A watched object: its key, annotations and an optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ObjectKey,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Resource {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            annotations: BTreeMap::new(),
            resource_version: 0,
        }
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        found: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read/update access to watched objects.
pub trait ResourceStore: Send + Sync {
    fn get(&self, key: &ObjectKey) -> Result<Resource, StoreError>;

    /// Replace the stored object if its version still matches `resource.resource_version`.
    ///
    /// Returns the stored object with its bumped version.
    fn update(&self, resource: Resource) -> Result<Resource, StoreError>;
}

impl<S> ResourceStore for Arc<S>
where
    S: ResourceStore + ?Sized,
{
    fn get(&self, key: &ObjectKey) -> Result<Resource, StoreError> {
        (**self).get(key)
    }

    fn update(&self, resource: Resource) -> Result<Resource, StoreError> {
        (**self).update(resource)
    }
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    inner: RwLock<HashMap<ObjectKey, Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object, bypassing the version check.
    pub fn insert(&self, resource: Resource) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(resource.key.clone(), resource);
        }
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Resource> {
        self.inner.write().ok()?.remove(key)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        match self.inner.read() {
            Ok(map) => {
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => vec![],
        }
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn get(&self, key: &ObjectKey) -> Result<Resource, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        map.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn update(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        let current = map
            .get(&resource.key)
            .ok_or_else(|| StoreError::NotFound(resource.key.clone()))?;

        if current.resource_version != resource.resource_version {
            return Err(StoreError::Conflict {
                key: resource.key.clone(),
                expected: resource.resource_version,
                found: current.resource_version,
            });
        }

        resource.resource_version += 1;
        map.insert(resource.key.clone(), resource.clone());
        Ok(resource)
    }
}
