//! Rule resources as they appear in cluster manifests.
//!
//! YAML shape:
//! apiVersion: loki.grafana.com/v1beta1
//! kind: AlertingRule            # or RecordingRule / LokiRule
//! metadata: { name, namespace, uid }
//! spec:
//!   tenantID: tenant-a          # optional
//!   groups:
//!     - name: an-alert
//!       interval: 1m
//!       limit: 2
//!       rules:
//!         - alert: HighPercentageErrors
//!           expr: sum(rate({app="foo"} |= "error" [5m])) by (job)
//!           for: 10m
//!
//! The raw shape keeps `alert` and `record` as plain strings so the validator
//! can see (and report) rules that set both. `Rule::rule_type` normalizes them.

use crate::status::RuleStatus;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const API_GROUP: &str = "loki.grafana.com";

/// Which resource type a manifest declares. Selects the validator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    LokiRule,
    AlertingRule,
    RecordingRule,
}

impl RuleKind {
    /// Classify a rule the way this resource type reads it. The split types
    /// only look at their own name field.
    pub fn classify(&self, rule: &Rule) -> RuleType {
        match self {
            Self::LokiRule => rule.rule_type(),
            Self::AlertingRule if rule.alert.is_empty() => RuleType::Unspecified,
            Self::AlertingRule => RuleType::Alerting,
            Self::RecordingRule if rule.record.is_empty() => RuleType::Unspecified,
            Self::RecordingRule => RuleType::Recording,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LokiRule => "LokiRule",
            Self::AlertingRule => "AlertingRule",
            Self::RecordingRule => "RecordingRule",
        };
        f.write_str(s)
    }
}

/// A duration string in the extended Prometheus grammar. Kept verbatim so
/// invalid input can be echoed back in violations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromDuration(pub String);

impl PromDuration {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PromDuration {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResource {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub kind: RuleKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RuleResourceSpec,
    #[serde(default)]
    pub status: RuleStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleResourceSpec {
    #[serde(default, rename = "tenantID", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub interval: PromDuration,
    /// Number of alerts or series the group may produce. 0 is no limit.
    #[serde(default)]
    pub limit: i32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub alert: String,
    #[serde(default)]
    pub record: String,
    #[serde(default)]
    pub expr: String,
    #[serde(default, rename = "for")]
    pub for_duration: PromDuration,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Normalized rule kind derived from which of `alert`/`record` is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Alerting,
    Recording,
    Ambiguous,
    Unspecified,
}

impl Rule {
    pub fn rule_type(&self) -> RuleType {
        match (self.alert.is_empty(), self.record.is_empty()) {
            (false, false) => RuleType::Ambiguous,
            (false, true) => RuleType::Alerting,
            (true, false) => RuleType::Recording,
            (true, true) => RuleType::Unspecified,
        }
    }
}

/// Namespaced name used to look resources up in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl RuleResource {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}

fn default_api_version() -> String {
    format!("{API_GROUP}/v1beta1")
}

/// Parse one or more `---` separated manifests. Empty documents are skipped.
pub fn load_resources_from_str(yaml: &str) -> crate::Result<Vec<RuleResource>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = serde_yaml::Value::deserialize(doc)
            .with_context(|| format!("parse manifest document {}", i + 1))?;
        if value.is_null() {
            continue;
        }
        let resource: RuleResource = serde_yaml::from_value(value)
            .with_context(|| format!("decode rule resource in document {}", i + 1))?;
        out.push(resource);
    }
    Ok(out)
}

pub fn load_resources_from_file(path: &Path) -> crate::Result<Vec<RuleResource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest file {}", path.display()))?;
    load_resources_from_str(&text)
        .with_context(|| format!("load manifests from {}", path.display()))
}
