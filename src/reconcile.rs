//! Reconcile handler: validate a stored rule resource and project the outcome
//! onto its status.
//!
//! Invalid resources and failed passes are requeued after one second; a
//! valid resource is done until its next change.

use crate::spec::ObjectKey;
use crate::status::{
    ConditionReason, Projection, RetryConfig, RuleStore, StoreError, ValidationOutcome, projector,
};
use crate::validate::{ErrorCategory, FieldError, validate_resource};
use std::time::Duration;
use thiserror::Error;

pub const REQUEUE_AFTER: Duration = Duration::from_secs(1);

/// Condition reason and message reported for a violation category.
pub fn reason_for(category: ErrorCategory) -> (ConditionReason, &'static str) {
    match category {
        ErrorCategory::AmbiguousRuleType => (
            ConditionReason::AmbiguousRuleConfig,
            "Ambiguous configuration mix of alerting and recording rule fields",
        ),
        ErrorCategory::ParseAlertForPeriod => (
            ConditionReason::InvalidAlertingRuleConfig,
            "Invalid alerting for period",
        ),
        ErrorCategory::ParseEvaluationInterval | ErrorCategory::InvalidRecordMetricName => (
            ConditionReason::InvalidRecordingRuleConfig,
            "Invalid recording rule configuration",
        ),
        ErrorCategory::ParseLogQLExpression => (
            ConditionReason::InvalidRuleExpression,
            "Invalid rule expression syntax",
        ),
        ErrorCategory::GroupNamesNotUnique => (
            ConditionReason::NotUniqueRuleGroupName,
            "Group names not unique",
        ),
    }
}

/// The first violation in traversal order decides the reported reason.
pub fn outcome_for(errs: &[FieldError]) -> ValidationOutcome {
    match errs.first() {
        None => ValidationOutcome::Valid,
        Some(first) => {
            let (reason, message) = reason_for(first.category);
            ValidationOutcome::Invalid {
                reason,
                message: message.to_string(),
            }
        }
    }
}

/// Validate the resource stored at `key`. `Ok(None)` when it no longer exists.
pub fn validate_rule(
    store: &dyn RuleStore,
    key: &ObjectKey,
) -> Result<Option<ValidationOutcome>, StoreError> {
    let Some(resource) = store.get(key)? else {
        tracing::warn!(namespace = %key.namespace, name = %key.name, "rule resource not found");
        return Ok(None);
    };

    let errs = validate_resource(&resource);
    let outcome = outcome_for(&errs);
    if let ValidationOutcome::Invalid { reason, .. } = &outcome {
        tracing::info!(
            namespace = %key.namespace,
            name = %key.name,
            kind = %resource.kind,
            %reason,
            violations = errs.len(),
            "rule resource invalid"
        );
    }
    Ok(Some(outcome))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// `None` when the resource was gone.
    pub outcome: Option<ValidationOutcome>,
    pub projection: Projection,
    pub requeue_after: Option<Duration>,
}

#[derive(Debug, Error)]
#[error("reconcile {key} failed")]
pub struct ReconcileError {
    pub key: ObjectKey,
    #[source]
    pub source: StoreError,
    pub requeue_after: Duration,
}

/// One reconcile pass for `key`.
pub fn reconcile(
    store: &dyn RuleStore,
    key: &ObjectKey,
    retry: &RetryConfig,
) -> Result<ReconcileResult, ReconcileError> {
    let fail = |source: StoreError| ReconcileError {
        key: key.clone(),
        source,
        requeue_after: REQUEUE_AFTER,
    };

    let Some(outcome) = validate_rule(store, key).map_err(fail)? else {
        return Ok(ReconcileResult {
            outcome: None,
            projection: Projection::Missing,
            requeue_after: None,
        });
    };

    let projection = projector::project(store, key, &outcome, retry).map_err(fail)?;
    let requeue_after = match outcome {
        ValidationOutcome::Valid => None,
        ValidationOutcome::Invalid { .. } => Some(REQUEUE_AFTER),
    };

    Ok(ReconcileResult {
        outcome: Some(outcome),
        projection,
        requeue_after,
    })
}
