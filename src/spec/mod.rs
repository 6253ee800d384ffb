//! Spec layer: rule resource manifests and the field paths used to point
//! into them.
//!
//! This module is intentionally separate from validation and rendering.
//! It owns:
//! - FieldPath (location of a field inside a resource spec)
//! - RuleResource and its groups/rules (serde shape of the manifests)

pub mod path;
pub mod resource;

pub use path::{FieldPath, Segment};
pub use resource::{
    API_GROUP, ObjectKey, ObjectMeta, PromDuration, Rule, RuleGroup, RuleKind, RuleResource,
    RuleResourceSpec, RuleType, load_resources_from_file, load_resources_from_str,
};
