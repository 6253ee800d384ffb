//! Admission checks for rule resources: create and update run the validator
//! for the resource's kind and reject with every violation found; delete is
//! always admitted.

use crate::spec::{API_GROUP, RuleKind, RuleResource};
use crate::validate::{FieldError, validate_resource};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Rejection of a resource, listing every field violation.
///
/// Displays as
/// `LokiRule.loki.grafana.com "my-rules" is invalid: [Spec.Groups[1].Name: Invalid value: "first": Group names are not unique]`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub struct InvalidResource {
    pub group: &'static str,
    pub kind: RuleKind,
    pub name: String,
    pub errors: Vec<FieldError>,
}

impl fmt::Display for InvalidResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {:?} is invalid: [", self.kind, self.group, self.name)?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{e}")?;
        }
        f.write_str("]")
    }
}

fn admit(resource: &RuleResource) -> Result<(), InvalidResource> {
    let errors = validate_resource(resource);
    if errors.is_empty() {
        return Ok(());
    }
    Err(InvalidResource {
        group: API_GROUP,
        kind: resource.kind,
        name: resource.metadata.name.clone(),
        errors,
    })
}

pub fn validate_create(resource: &RuleResource) -> Result<(), InvalidResource> {
    tracing::info!(kind = %resource.kind, name = %resource.metadata.name, "validate create");
    admit(resource)
}

/// The previous object plays no part: the new spec is validated on its own.
pub fn validate_update(
    _old: &RuleResource,
    resource: &RuleResource,
) -> Result<(), InvalidResource> {
    tracing::info!(kind = %resource.kind, name = %resource.metadata.name, "validate update");
    admit(resource)
}

pub fn validate_delete(resource: &RuleResource) -> Result<(), InvalidResource> {
    tracing::info!(kind = %resource.kind, name = %resource.metadata.name, "validate delete");
    Ok(())
}
