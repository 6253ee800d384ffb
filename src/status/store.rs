//! Object store the status projector reads from and writes to.
//!
//! Writes are guarded by `resourceVersion`: an update carrying a stale version
//! fails with `StoreError::Conflict` and must be retried from a fresh read.

use super::RuleStatus;
use crate::spec::{ObjectKey, RuleResource};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),
    #[error("conflict updating {key}: expected resourceVersion {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub trait RuleStore: Send + Sync {
    /// `Ok(None)` when the resource does not exist.
    fn get(&self, key: &ObjectKey) -> Result<Option<RuleResource>, StoreError>;

    /// Replace the status of the resource at `resource_version`. Returns the
    /// stored resource with its new version.
    fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: RuleStatus,
    ) -> Result<RuleResource, StoreError>;
}

/// Concurrent in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: DashMap<ObjectKey, RuleResource>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a resource. The stored copy gets the next version.
    pub fn insert(&self, mut resource: RuleResource) -> RuleResource {
        let key = resource.key();
        let prev = self
            .objects
            .get(&key)
            .map(|r| r.metadata.resource_version)
            .unwrap_or(0);
        resource.metadata.resource_version = prev.max(resource.metadata.resource_version) + 1;
        self.objects.insert(key, resource.clone());
        resource
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<RuleResource> {
        self.objects.remove(key).map(|(_, r)| r)
    }

    /// Snapshot of all resources ordered by key.
    pub fn list(&self) -> Vec<RuleResource> {
        let mut out: Vec<RuleResource> = self.objects.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|r| r.key());
        out
    }
}

impl RuleStore for InMemoryStore {
    fn get(&self, key: &ObjectKey) -> Result<Option<RuleResource>, StoreError> {
        Ok(self.objects.get(key).map(|r| r.value().clone()))
    }

    fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: RuleStatus,
    ) -> Result<RuleResource, StoreError> {
        let mut entry = self
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let actual = entry.metadata.resource_version;
        if actual != resource_version {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected: resource_version,
                actual,
            });
        }

        entry.status = status;
        entry.metadata.resource_version += 1;
        Ok(entry.value().clone())
    }
}
