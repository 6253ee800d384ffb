//! Rule rendering: validated groups -> the YAML document the ruler loads.
//!
//! Output shape:
//! groups:
//!   - name: an-alert
//!     interval: 1m        # omitted when empty
//!     limit: 2            # omitted when 0
//!     rules:
//!       - alert: HighPercentageErrors
//!         expr: ...
//!         for: 10m
//!         labels: { severity: page }
//!       - record: nginx:requests:rate1m
//!         expr: ...
//!
//! Rendering is deterministic: groups and rules keep input order, label and
//! annotation maps are emitted sorted.

pub mod bundle;

pub use bundle::{RulesConfigBundle, build_bundle, document_key, fingerprint};

use crate::spec::{RuleGroup, RuleKind, RuleType};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("rule {index} in group {group:?} sets both alert and record")]
    AmbiguousRule { group: String, index: usize },
    #[error("rule {index} in group {group:?} sets neither alert nor record")]
    UnspecifiedRule { group: String, index: usize },
    #[error("duplicate document key {0:?} in rules bundle")]
    DuplicateKey(String),
    #[error("failed to serialize rules document")]
    Serialize(#[from] serde_yaml::Error),
}

#[derive(Serialize)]
struct RulesDocument<'a> {
    groups: Vec<RenderedGroup<'a>>,
}

#[derive(Serialize)]
struct RenderedGroup<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<i32>,
    rules: Vec<RenderedRule<'a>>,
}

#[derive(Serialize)]
struct RenderedRule<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a str>,
    expr: &'a str,
    #[serde(rename = "for", skip_serializing_if = "Option::is_none")]
    for_duration: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a BTreeMap<String, String>>,
}

fn non_empty<T: ?Sized>(value: &T, empty: bool) -> Option<&T> {
    (!empty).then_some(value)
}

/// Render the groups of one resource. `kind` decides how each rule is read
/// (see `RuleKind::classify`).
pub fn render_rules_config(kind: RuleKind, groups: &[RuleGroup]) -> Result<String, RenderError> {
    let mut rendered = Vec::with_capacity(groups.len());

    for group in groups {
        let mut rules = Vec::with_capacity(group.rules.len());
        for (index, rule) in group.rules.iter().enumerate() {
            let r = match kind.classify(rule) {
                RuleType::Alerting => RenderedRule {
                    alert: Some(rule.alert.as_str()),
                    record: None,
                    expr: &rule.expr,
                    for_duration: non_empty(
                        rule.for_duration.as_str(),
                        rule.for_duration.is_empty(),
                    ),
                    labels: non_empty(&rule.labels, rule.labels.is_empty()),
                    annotations: non_empty(&rule.annotations, rule.annotations.is_empty()),
                },
                RuleType::Recording => RenderedRule {
                    alert: None,
                    record: Some(rule.record.as_str()),
                    expr: &rule.expr,
                    for_duration: None,
                    labels: None,
                    annotations: None,
                },
                RuleType::Ambiguous => {
                    return Err(RenderError::AmbiguousRule {
                        group: group.name.clone(),
                        index,
                    });
                }
                RuleType::Unspecified => {
                    return Err(RenderError::UnspecifiedRule {
                        group: group.name.clone(),
                        index,
                    });
                }
            };
            rules.push(r);
        }

        rendered.push(RenderedGroup {
            name: &group.name,
            interval: non_empty(group.interval.as_str(), group.interval.is_empty()),
            limit: (group.limit != 0).then_some(group.limit),
            rules,
        });
    }

    Ok(serde_yaml::to_string(&RulesDocument { groups: rendered })?)
}
