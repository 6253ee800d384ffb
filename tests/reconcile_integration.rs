use logrule::config;
use logrule::reconcile::{REQUEUE_AFTER, reconcile, validate_rule};
use logrule::render::build_bundle;
use logrule::spec::{ObjectKey, RuleResource, load_resources_from_file, load_resources_from_str};
use logrule::status::{
    ConditionReason, ConditionStatus, ConditionType, InMemoryStore, Projection, RetryConfig,
    RuleStore, ValidationOutcome,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

const MANIFESTS: &str = r#"
apiVersion: loki.grafana.com/v1beta1
kind: LokiRule
metadata: { name: good, namespace: dev, uid: u1 }
spec:
  tenantID: application
  groups:
    - name: errors
      interval: 1m
      rules:
        - alert: HighErrorRate
          for: 5m
          expr: 'sum(rate({app="foo"} |= "error" [5m])) by (job) > 0.05'
          labels: { severity: page }
        - record: "foo:errors:rate5m"
          expr: 'sum(rate({app="foo"} |= "error" [5m]))'
---
apiVersion: loki.grafana.com/v1beta1
kind: LokiRule
metadata: { name: bad, namespace: dev, uid: u2 }
spec:
  groups:
    - name: dup
      interval: 1m
    - name: dup
      interval: 1m
      rules:
        - alert: Broken
          expr: 'sum(rate({app="foo"}'
"#;

fn retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::ZERO,
        backoff_factor: 1.0,
    }
}

fn seeded() -> InMemoryStore {
    let store = InMemoryStore::new();
    for resource in load_resources_from_str(MANIFESTS).unwrap() {
        store.insert(resource);
    }
    store
}

fn get(store: &InMemoryStore, name: &str) -> RuleResource {
    store.get(&ObjectKey::new("dev", name)).unwrap().unwrap()
}

#[test]
fn valid_resource_gets_valid_condition() {
    let store = seeded();
    let key = ObjectKey::new("dev", "good");

    let result = reconcile(&store, &key, &retry()).unwrap();
    assert_eq!(result.outcome, Some(ValidationOutcome::Valid));
    assert_eq!(result.projection, Projection::Updated);
    assert_eq!(result.requeue_after, None);

    let status = get(&store, "good").status;
    assert_eq!(status.conditions.len(), 1);
    let cond = &status.conditions[0];
    assert_eq!(cond.condition_type, ConditionType::Valid);
    assert_eq!(cond.reason, ConditionReason::AllRulesValid);

    let again = reconcile(&store, &key, &retry()).unwrap();
    assert_eq!(again.projection, Projection::Unchanged);
}

#[test]
fn invalid_resource_reports_first_violation_and_requeues() {
    let store = seeded();
    let key = ObjectKey::new("dev", "bad");

    let result = reconcile(&store, &key, &retry()).unwrap();
    assert_eq!(
        result.outcome,
        Some(ValidationOutcome::Invalid {
            reason: ConditionReason::NotUniqueRuleGroupName,
            message: "Group names not unique".into(),
        })
    );
    assert_eq!(result.requeue_after, Some(REQUEUE_AFTER));

    let active = get(&store, "bad").status.active().cloned().unwrap();
    assert_eq!(active.condition_type, ConditionType::Invalid);
    assert_eq!(active.reason, ConditionReason::NotUniqueRuleGroupName);
}

#[test]
fn fixing_a_resource_flips_its_conditions() {
    let store = seeded();
    let key = ObjectKey::new("dev", "bad");
    reconcile(&store, &key, &retry()).unwrap();

    let mut fixed = get(&store, "bad");
    fixed.spec.groups[1].name = "other".into();
    fixed.spec.groups[1].rules[0].expr = r#"sum(rate({app="foo"}[1m]))"#.into();
    store.insert(fixed);

    let result = reconcile(&store, &key, &retry()).unwrap();
    assert_eq!(result.outcome, Some(ValidationOutcome::Valid));

    let status = get(&store, "bad").status;
    assert_eq!(status.conditions.len(), 2);
    assert_eq!(
        status.condition(ConditionType::Invalid).map(|c| c.status),
        Some(ConditionStatus::False)
    );
    assert_eq!(
        status.condition(ConditionType::Valid).map(|c| c.status),
        Some(ConditionStatus::True)
    );
}

#[test]
fn missing_resource_is_not_an_error() {
    let store = seeded();
    let key = ObjectKey::new("dev", "deleted");
    assert_eq!(validate_rule(&store, &key).unwrap(), None);

    let result = reconcile(&store, &key, &retry()).unwrap();
    assert_eq!(result.outcome, None);
    assert_eq!(result.projection, Projection::Missing);
}

#[test]
fn manifests_and_config_from_disk_render_a_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let manifests = dir.path().join("rules.yaml");
    std::fs::write(&manifests, MANIFESTS).unwrap();
    let cfg_path = dir.path().join("logrule.yaml");
    let cfg_yaml = "bundle:\n  name: tenant-rules\nretry:\n  initial_delay_ms: 0\n";
    std::fs::write(&cfg_path, cfg_yaml).unwrap();

    let cfg = config::load_from_file(&cfg_path).unwrap();
    let resources = load_resources_from_file(&manifests).unwrap();
    let good: Vec<RuleResource> = resources
        .into_iter()
        .filter(|r| r.metadata.name == "good")
        .collect();

    let bundle = build_bundle(&cfg.bundle.name, &good).unwrap();
    assert_eq!(bundle.name, "tenant-rules");
    assert_eq!(
        bundle.data.keys().collect::<Vec<_>>(),
        vec!["dev-good-u1.yaml"]
    );
    assert_eq!(
        bundle.tenants.get("application"),
        Some(&vec!["dev-good-u1.yaml".to_string()])
    );

    let doc: serde_yaml::Value = serde_yaml::from_str(&bundle.data["dev-good-u1.yaml"]).unwrap();
    let rules = &doc["groups"][0]["rules"];
    assert_eq!(rules[0]["alert"].as_str(), Some("HighErrorRate"));
    assert_eq!(rules[0]["for"].as_str(), Some("5m"));
    assert_eq!(rules[1]["record"].as_str(), Some("foo:errors:rate5m"));
    assert!(rules[1].get("for").is_none());
    assert_eq!(doc["groups"][0]["interval"].as_str(), Some("1m"));
}
