//! Rule spec validation.
//!
//! Every group and rule is visited once, in manifest order, and each violation
//! is pushed onto an `ErrorList` at the field path where it occurs. Nothing
//! short-circuits: the caller gets the complete list in one pass.
//!
//! Check order per group: name uniqueness, interval, then per rule: ambiguity,
//! `for`, `record`, `expr`. Which checks run depends on the resource kind.

pub mod duration;
pub mod metric;

pub use duration::{DurationError, parse_duration};
pub use metric::is_valid_metric_name;

use crate::logql;
use crate::spec::{FieldPath, RuleGroup, RuleKind, RuleResource};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Category of a single violation. The display text is the violation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum ErrorCategory {
    #[error("Ambiguous rule configuration")]
    AmbiguousRuleType,
    #[error("Group names are not unique")]
    GroupNamesNotUnique,
    #[error("Failed to parse record metric name")]
    InvalidRecordMetricName,
    #[error("Failed to parse alert firing period")]
    ParseAlertForPeriod,
    #[error("Failed to parse evaluation")]
    ParseEvaluationInterval,
    #[error("Failed to parse LogQL expression")]
    ParseLogQLExpression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: FieldPath,
    pub invalid_value: String,
    pub category: ErrorCategory,
}

impl FieldError {
    pub fn message(&self) -> String {
        self.category.to_string()
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Invalid value: {:?}: {}",
            self.path, self.invalid_value, self.category
        )
    }
}

/// Accumulator threaded through the traversal.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalid(&mut self, path: FieldPath, value: &str, category: ErrorCategory) {
        self.0.push(FieldError {
            path,
            invalid_value: value.to_string(),
            category,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }
}

/// Which checks a resource kind opts into.
#[derive(Debug, Clone, Copy)]
struct Checks {
    interval: bool,
    ambiguity: bool,
    alert_for: bool,
    record_name: bool,
}

impl Checks {
    fn for_kind(kind: RuleKind) -> Self {
        match kind {
            RuleKind::LokiRule => Self {
                interval: true,
                ambiguity: true,
                alert_for: true,
                record_name: true,
            },
            RuleKind::AlertingRule => Self {
                interval: false,
                ambiguity: false,
                alert_for: true,
                record_name: false,
            },
            RuleKind::RecordingRule => Self {
                interval: true,
                ambiguity: false,
                alert_for: false,
                record_name: true,
            },
        }
    }
}

pub fn validate_resource(resource: &RuleResource) -> Vec<FieldError> {
    validate_groups(resource.kind, &resource.spec.groups)
}

/// Validate the groups of one resource and return every violation found.
/// An empty result means the groups are valid.
pub fn validate_groups(kind: RuleKind, groups: &[RuleGroup]) -> Vec<FieldError> {
    let checks = Checks::for_kind(kind);
    let mut errs = ErrorList::new();
    let groups_path = FieldPath::new("Spec").child("Groups");

    let mut seen: HashSet<&str> = HashSet::new();
    for (i, group) in groups.iter().enumerate() {
        let group_path = groups_path.index(i);
        validate_group(group, &group_path, checks, &mut seen, &mut errs);
    }

    errs.into_vec()
}

fn validate_group<'a>(
    group: &'a RuleGroup,
    path: &FieldPath,
    checks: Checks,
    seen: &mut HashSet<&'a str>,
    errs: &mut ErrorList,
) {
    if !seen.insert(group.name.as_str()) {
        errs.invalid(
            path.child("Name"),
            &group.name,
            ErrorCategory::GroupNamesNotUnique,
        );
    }

    if checks.interval && parse_duration(group.interval.as_str()).is_err() {
        errs.invalid(
            path.child("Interval"),
            group.interval.as_str(),
            ErrorCategory::ParseEvaluationInterval,
        );
    }

    for (j, rule) in group.rules.iter().enumerate() {
        let rule_path = path.child("Rules").index(j);
        let has_alert = !rule.alert.is_empty();
        let has_record = !rule.record.is_empty();

        if checks.ambiguity && has_alert && has_record {
            errs.invalid(
                rule_path.child("Alert"),
                &rule.alert,
                ErrorCategory::AmbiguousRuleType,
            );
            errs.invalid(
                rule_path.child("Record"),
                &rule.record,
                ErrorCategory::AmbiguousRuleType,
            );
        }

        if checks.alert_for && has_alert && parse_duration(rule.for_duration.as_str()).is_err() {
            errs.invalid(
                rule_path.child("For"),
                rule.for_duration.as_str(),
                ErrorCategory::ParseAlertForPeriod,
            );
        }

        if checks.record_name && has_record && !is_valid_metric_name(&rule.record) {
            errs.invalid(
                rule_path.child("Record"),
                &rule.record,
                ErrorCategory::InvalidRecordMetricName,
            );
        }

        if logql::parse_expr(&rule.expr).is_err() {
            errs.invalid(
                rule_path.child("Expr"),
                &rule.expr,
                ErrorCategory::ParseLogQLExpression,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{PromDuration, Rule};
    use pretty_assertions::assert_eq;

    const EXPR: &str = r#"sum(rate({label="value"}[1m]))"#;

    fn group(name: &str, interval: &str, rules: Vec<Rule>) -> RuleGroup {
        RuleGroup {
            name: name.into(),
            interval: PromDuration::from(interval),
            limit: 0,
            rules,
        }
    }

    fn alert(name: &str, for_duration: &str, expr: &str) -> Rule {
        Rule {
            alert: name.into(),
            for_duration: for_duration.into(),
            expr: expr.into(),
            ..Default::default()
        }
    }

    fn record(name: &str, expr: &str) -> Rule {
        Rule {
            record: name.into(),
            expr: expr.into(),
            ..Default::default()
        }
    }

    fn paths(errs: &[FieldError]) -> Vec<String> {
        errs.iter().map(|e| e.path.to_string()).collect()
    }

    #[test]
    fn valid_spec_has_no_violations() {
        let groups = vec![
            group(
                "first",
                "1m",
                vec![
                    alert(
                        "first-alert",
                        "10m",
                        r#"sum(rate({app="foo", env="production"} |= "error" [5m])) by (job)"#,
                    ),
                    alert(
                        "second-alert",
                        "10m",
                        r#"sum(rate({app="foo", env="stage"} |= "error" [5m])) by (job)"#,
                    ),
                ],
            ),
            group(
                "second",
                "1m",
                vec![
                    record("nginx:requests:rate1m", r#"sum(rate({container="nginx"}[1m]))"#),
                    record("banana:requests:rate5m", r#"sum(rate({container="banana"}[1m]))"#),
                ],
            ),
        ];

        assert_eq!(validate_groups(RuleKind::LokiRule, &groups), vec![]);
    }

    #[test]
    fn duplicate_names_report_each_repeat() {
        let groups = vec![
            group("first", "1m", vec![]),
            group("first", "1m", vec![]),
            group("other", "1m", vec![]),
            group("first", "1m", vec![]),
        ];

        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(
            paths(&errs),
            vec!["Spec.Groups[1].Name", "Spec.Groups[3].Name"]
        );
        assert!(errs.iter().all(|e| {
            e.category == ErrorCategory::GroupNamesNotUnique && e.invalid_value == "first"
        }));
    }

    #[test]
    fn ambiguous_rule_reports_both_fields() {
        let mut rule = alert("an-alert", "1m", EXPR);
        rule.record = "a_record_name".into();
        let groups = vec![group("first", "1m", vec![rule])];

        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(
            errs,
            vec![
                FieldError {
                    path: FieldPath::new("Spec")
                        .child("Groups")
                        .index(0)
                        .child("Rules")
                        .index(0)
                        .child("Alert"),
                    invalid_value: "an-alert".into(),
                    category: ErrorCategory::AmbiguousRuleType,
                },
                FieldError {
                    path: FieldPath::new("Spec")
                        .child("Groups")
                        .index(0)
                        .child("Rules")
                        .index(0)
                        .child("Record"),
                    invalid_value: "a_record_name".into(),
                    category: ErrorCategory::AmbiguousRuleType,
                },
            ]
        );
    }

    #[test]
    fn bad_interval() {
        let errs = validate_groups(RuleKind::LokiRule, &[group("first", "1mo", vec![])]);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Interval"]);
        assert_eq!(errs[0].category, ErrorCategory::ParseEvaluationInterval);
        assert_eq!(errs[0].invalid_value, "1mo");
    }

    #[test]
    fn bad_for_period() {
        let groups = vec![group("first", "1m", vec![alert("an-alert", "10years", EXPR)])];
        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Rules[0].For"]);
        assert_eq!(errs[0].category, ErrorCategory::ParseAlertForPeriod);
        assert_eq!(errs[0].message(), "Failed to parse alert firing period");
    }

    #[test]
    fn bad_record_name() {
        let groups = vec![group(
            "first",
            "1m",
            vec![record("invalid&metric:name", EXPR)],
        )];
        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Rules[0].Record"]);
        assert_eq!(errs[0].category, ErrorCategory::InvalidRecordMetricName);
    }

    #[test]
    fn bad_expression() {
        let groups = vec![group(
            "first",
            "1m",
            vec![Rule {
                expr: "this is not a valid expression".into(),
                ..Default::default()
            }],
        )];
        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Rules[0].Expr"]);
        assert_eq!(errs[0].category, ErrorCategory::ParseLogQLExpression);
    }

    #[test]
    fn deeply_nested_expression_is_a_violation() {
        let expr = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let groups = vec![group("first", "1m", vec![record("deep", &expr)])];
        let errs = validate_groups(RuleKind::LokiRule, &groups);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Rules[0].Expr"]);
        assert_eq!(errs[0].category, ErrorCategory::ParseLogQLExpression);
    }

    #[test]
    fn collects_everything_in_traversal_order() {
        let mut ambiguous = alert("x", "bad", "nope(");
        ambiguous.record = "1bad".into();
        let groups = vec![
            group("a", "1m", vec![]),
            group("a", "1mo", vec![ambiguous, record("ok", EXPR)]),
        ];

        let errs = validate_groups(RuleKind::LokiRule, &groups);
        let cats: Vec<ErrorCategory> = errs.iter().map(|e| e.category).collect();
        assert_eq!(
            cats,
            vec![
                ErrorCategory::GroupNamesNotUnique,
                ErrorCategory::ParseEvaluationInterval,
                ErrorCategory::AmbiguousRuleType,
                ErrorCategory::AmbiguousRuleType,
                ErrorCategory::ParseAlertForPeriod,
                ErrorCategory::InvalidRecordMetricName,
                ErrorCategory::ParseLogQLExpression,
            ]
        );
        assert_eq!(
            paths(&errs),
            vec![
                "Spec.Groups[1].Name",
                "Spec.Groups[1].Interval",
                "Spec.Groups[1].Rules[0].Alert",
                "Spec.Groups[1].Rules[0].Record",
                "Spec.Groups[1].Rules[0].For",
                "Spec.Groups[1].Rules[0].Record",
                "Spec.Groups[1].Rules[0].Expr",
            ]
        );
    }

    #[test]
    fn alerting_kind_skips_interval_and_record_checks() {
        let mut rule = alert("an-alert", "1m", EXPR);
        rule.record = "invalid&name".into();
        let groups = vec![group("first", "1mo", vec![rule])];

        assert_eq!(validate_groups(RuleKind::AlertingRule, &groups), vec![]);
    }

    #[test]
    fn recording_kind_skips_for_check() {
        let mut rule = record("ok:name", EXPR);
        rule.alert = "ignored".into();
        rule.for_duration = "10years".into();
        let groups = vec![group("first", "1mo", vec![rule])];

        let errs = validate_groups(RuleKind::RecordingRule, &groups);
        assert_eq!(paths(&errs), vec!["Spec.Groups[0].Interval"]);
    }

    #[test]
    fn field_error_display() {
        let errs = validate_groups(RuleKind::LokiRule, &[group("g", "1mo", vec![])]);
        assert_eq!(
            errs[0].to_string(),
            r#"Spec.Groups[0].Interval: Invalid value: "1mo": Failed to parse evaluation"#
        );
    }
}
