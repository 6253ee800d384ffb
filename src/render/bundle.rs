//! Aggregation of many resources into one rules bundle.
//!
//! Each resource renders to its own document keyed
//! `<namespace>-<name>-<uid>.yaml`. The bundle also carries a tenant index
//! (tenantID -> document keys) and a content fingerprint:
//!
//! sha256( len(key_1) || key_1 || len(doc_1) || doc_1 || ... )   keys in sorted order
//!
//! with lengths as 8-byte little-endian integers.
//!
//! The fingerprint is a change signal for restarting the ruler, nothing more.

use super::{RenderError, render_rules_config};
use crate::spec::RuleResource;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulesConfigBundle {
    pub name: String,
    /// Document key -> rendered YAML.
    pub data: BTreeMap<String, String>,
    /// Tenant -> document keys of resources pinned to that tenant.
    pub tenants: BTreeMap<String, Vec<String>>,
    pub fingerprint: String,
}

pub fn document_key(resource: &RuleResource) -> String {
    let meta = &resource.metadata;
    format!("{}-{}-{}.yaml", meta.namespace, meta.name, meta.uid)
}

/// Lowercase hex SHA-256 over every key followed by its document, keys sorted.
/// Each part is length-prefixed.
pub fn fingerprint(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, doc) in data {
        for part in [key, doc] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Render every resource and assemble the bundle. Any render failure or key
/// collision aborts the whole bundle.
pub fn build_bundle(
    name: &str,
    resources: &[RuleResource],
) -> Result<RulesConfigBundle, RenderError> {
    let mut data = BTreeMap::new();
    let mut tenants: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for resource in resources {
        let key = document_key(resource);
        let doc = render_rules_config(resource.kind, &resource.spec.groups)?;

        match data.entry(key.clone()) {
            Entry::Occupied(_) => return Err(RenderError::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(doc);
            }
        }

        if let Some(tenant) = resource.spec.tenant_id.as_deref().filter(|t| !t.is_empty()) {
            tenants.entry(tenant.to_string()).or_default().push(key);
        }
    }

    for keys in tenants.values_mut() {
        keys.sort();
    }

    let fingerprint = fingerprint(&data);
    tracing::debug!(
        bundle = name,
        documents = data.len(),
        tenants = tenants.len(),
        %fingerprint,
        "rules bundle built"
    );

    Ok(RulesConfigBundle {
        name: name.to_string(),
        data,
        tenants,
        fingerprint,
    })
}
