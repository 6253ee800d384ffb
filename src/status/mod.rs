//! Validity conditions on rule resources.
//!
//! A resource carries at most one condition per type, and at most one of them
//! is `True` at a time:
//!
//! status:
//!   conditions:
//!     - type: Valid
//!       status: "False"
//!       reason: AllRulesValid
//!       message: All rules valid
//!       lastTransitionTime: 1700000000000
//!     - type: Invalid
//!       status: "True"
//!       reason: InvalidRuleExpression
//!       message: Invalid rule expression syntax
//!       lastTransitionTime: 1700000005000
//!
//! `reduce` computes the next status for an outcome, or `None` when the
//! current status already reflects it.

pub mod projector;
pub mod retry;
pub mod store;

pub use projector::{Projection, set_invalid, set_valid};
pub use retry::{RetryConfig, retry_on_conflict};
pub use store::{InMemoryStore, RuleStore, StoreError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const ALL_RULES_VALID_MESSAGE: &str = "All rules valid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    AllRulesValid,
    AmbiguousRuleConfig,
    InvalidAlertingRuleConfig,
    InvalidRecordingRuleConfig,
    InvalidRuleExpression,
    NotUniqueRuleGroupName,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_transition_time: u64,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RuleStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// The single `True` condition, if any.
    pub fn active(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.is_true())
    }
}

/// Result of validating one resource, as it will be projected onto its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome")]
pub enum ValidationOutcome {
    Valid,
    Invalid {
        reason: ConditionReason,
        message: String,
    },
}

impl ValidationOutcome {
    fn condition(&self, now_ms: u64) -> Condition {
        let (condition_type, reason, message) = match self {
            Self::Valid => (
                ConditionType::Valid,
                ConditionReason::AllRulesValid,
                ALL_RULES_VALID_MESSAGE.to_string(),
            ),
            Self::Invalid { reason, message } => (ConditionType::Invalid, *reason, message.clone()),
        };
        Condition {
            condition_type,
            status: ConditionStatus::True,
            reason,
            message,
            last_transition_time: now_ms,
        }
    }

    /// Whether `status` already records this outcome.
    fn is_reflected_in(&self, status: &RuleStatus) -> bool {
        status.conditions.iter().any(|c| {
            c.is_true()
                && match self {
                    Self::Valid => c.condition_type == ConditionType::Valid,
                    Self::Invalid { reason, .. } => {
                        c.condition_type == ConditionType::Invalid && c.reason == *reason
                    }
                }
        })
    }
}

/// Next status for `outcome`: the matching condition becomes the only `True`
/// one, replacing any earlier condition of the same type. `None` means no
/// write is needed.
pub fn reduce(status: &RuleStatus, outcome: &ValidationOutcome, now_ms: u64) -> Option<RuleStatus> {
    if outcome.is_reflected_in(status) {
        return None;
    }

    let next = outcome.condition(now_ms);
    let mut conditions = Vec::with_capacity(status.conditions.len() + 1);
    let mut replaced = false;

    for c in &status.conditions {
        if c.condition_type == next.condition_type {
            if !replaced {
                conditions.push(next.clone());
                replaced = true;
            }
            continue;
        }
        let mut c = c.clone();
        if c.is_true() {
            c.status = ConditionStatus::False;
            c.last_transition_time = now_ms;
        }
        conditions.push(c);
    }
    if !replaced {
        conditions.push(next);
    }

    Some(RuleStatus { conditions })
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
