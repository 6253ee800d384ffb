//! Read-modify-write of validity conditions against a `RuleStore`.

use super::retry::{RetryConfig, retry_on_conflict};
use super::store::{RuleStore, StoreError};
use super::{ConditionReason, ValidationOutcome, now_ms, reduce};
use crate::spec::ObjectKey;

/// What a projection did to the stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Status rewritten.
    Updated,
    /// Status already reflected the outcome.
    Unchanged,
    /// Resource gone at read or write time.
    Missing,
}

pub fn set_valid(
    store: &dyn RuleStore,
    key: &ObjectKey,
    retry: &RetryConfig,
) -> Result<Projection, StoreError> {
    project(store, key, &ValidationOutcome::Valid, retry)
}

pub fn set_invalid(
    store: &dyn RuleStore,
    key: &ObjectKey,
    reason: ConditionReason,
    message: &str,
    retry: &RetryConfig,
) -> Result<Projection, StoreError> {
    let outcome = ValidationOutcome::Invalid {
        reason,
        message: message.to_string(),
    };
    project(store, key, &outcome, retry)
}

/// Apply `outcome` to the resource at `key`, retrying from a fresh read on
/// version conflicts.
pub fn project(
    store: &dyn RuleStore,
    key: &ObjectKey,
    outcome: &ValidationOutcome,
    retry: &RetryConfig,
) -> Result<Projection, StoreError> {
    let projection = retry_on_conflict(retry, || {
        let Some(resource) = store.get(key)? else {
            return Ok(Projection::Missing);
        };
        let Some(next) = reduce(&resource.status, outcome, now_ms()) else {
            return Ok(Projection::Unchanged);
        };
        match store.update_status(key, resource.metadata.resource_version, next) {
            Ok(_) => Ok(Projection::Updated),
            Err(StoreError::NotFound(_)) => Ok(Projection::Missing),
            Err(e) => Err(e),
        }
    })?;

    tracing::debug!(
        namespace = %key.namespace,
        name = %key.name,
        ?outcome,
        ?projection,
        "status projected"
    );
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ObjectMeta, RuleKind, RuleResource, RuleResourceSpec};
    use crate::status::{ConditionStatus, ConditionType, InMemoryStore, RuleStatus};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    fn stored(store: &InMemoryStore) -> ObjectKey {
        store
            .insert(RuleResource {
                api_version: "loki.grafana.com/v1beta1".into(),
                kind: RuleKind::LokiRule,
                metadata: ObjectMeta {
                    name: "rules".into(),
                    namespace: "dev".into(),
                    uid: "uid-1".into(),
                    resource_version: 0,
                },
                spec: RuleResourceSpec::default(),
                status: RuleStatus::default(),
            })
            .key()
    }

    fn status(store: &InMemoryStore, key: &ObjectKey) -> RuleStatus {
        store.get(key).unwrap().unwrap().status
    }

    /// Bumps the stored version behind the caller's back for the first
    /// `conflicts` writes.
    struct Contended<'a> {
        inner: &'a InMemoryStore,
        conflicts: AtomicU32,
    }

    impl RuleStore for Contended<'_> {
        fn get(&self, key: &ObjectKey) -> Result<Option<RuleResource>, StoreError> {
            self.inner.get(key)
        }

        fn update_status(
            &self,
            key: &ObjectKey,
            resource_version: u64,
            status: RuleStatus,
        ) -> Result<RuleResource, StoreError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                if let Some(current) = self.inner.get(key)? {
                    self.inner.insert(current);
                }
            }
            self.inner.update_status(key, resource_version, status)
        }
    }

    struct Down;

    impl RuleStore for Down {
        fn get(&self, _key: &ObjectKey) -> Result<Option<RuleResource>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn update_status(
            &self,
            _key: &ObjectKey,
            _resource_version: u64,
            _status: RuleStatus,
        ) -> Result<RuleResource, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn set_valid_twice_leaves_one_valid_condition() {
        let store = InMemoryStore::new();
        let key = stored(&store);

        assert_eq!(set_valid(&store, &key, &fast_retry()), Ok(Projection::Updated));
        assert_eq!(set_valid(&store, &key, &fast_retry()), Ok(Projection::Unchanged));

        let s = status(&store, &key);
        assert_eq!(s.conditions.len(), 1);
        assert_eq!(s.conditions[0].condition_type, ConditionType::Valid);
        assert_eq!(s.conditions[0].message, "All rules valid");
    }

    #[test]
    fn set_invalid_twice_with_new_reason() {
        let store = InMemoryStore::new();
        let key = stored(&store);
        let retry = fast_retry();

        set_valid(&store, &key, &retry).unwrap();
        let expr = ConditionReason::InvalidRuleExpression;
        set_invalid(&store, &key, expr, "Invalid rule expression syntax", &retry).unwrap();
        let names = ConditionReason::NotUniqueRuleGroupName;
        set_invalid(&store, &key, names, "Group names not unique", &retry).unwrap();

        let s = status(&store, &key);
        let trues: Vec<_> = s.conditions.iter().filter(|c| c.is_true()).collect();
        assert_eq!(trues.len(), 1);
        assert_eq!(trues[0].reason, ConditionReason::NotUniqueRuleGroupName);
        assert_eq!(trues[0].message, "Group names not unique");
        assert_eq!(
            s.condition(ConditionType::Valid).map(|c| c.status),
            Some(ConditionStatus::False)
        );
    }

    #[test]
    fn missing_resource_is_a_no_op() {
        let store = InMemoryStore::new();
        let key = ObjectKey::new("dev", "gone");
        assert_eq!(set_valid(&store, &key, &fast_retry()), Ok(Projection::Missing));
    }

    #[test]
    fn conflicts_are_retried_from_a_fresh_read() {
        let inner = InMemoryStore::new();
        let key = stored(&inner);
        let store = Contended {
            inner: &inner,
            conflicts: AtomicU32::new(2),
        };

        assert_eq!(set_valid(&store, &key, &fast_retry()), Ok(Projection::Updated));
        assert_eq!(status(&inner, &key).conditions.len(), 1);
    }

    #[test]
    fn persistent_conflicts_propagate() {
        let inner = InMemoryStore::new();
        let key = stored(&inner);
        let store = Contended {
            inner: &inner,
            conflicts: AtomicU32::new(10),
        };

        let err = set_valid(&store, &key, &fast_retry()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(status(&inner, &key), RuleStatus::default());
    }

    #[test]
    fn unavailable_store_propagates() {
        let err = set_valid(&Down, &ObjectKey::new("dev", "x"), &fast_retry()).unwrap_err();
        assert_eq!(err, StoreError::Unavailable("connection refused".into()));
    }
}
