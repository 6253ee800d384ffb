//! Validation, rendering and status reconciliation for Loki rule resources.
//!
//! Pipeline:
//! - `spec`: load `LokiRule` / `AlertingRule` / `RecordingRule` manifests
//! - `validate`: collect every field violation (LogQL via `logql`)
//! - `admission` / `reconcile`: reject invalid resources, project validity
//!   onto status conditions through a `status::RuleStore`
//! - `render`: turn valid resources into the ruler's rules bundle

pub mod admission;
pub mod config;
pub mod logql;
pub mod reconcile;
pub mod render;
pub mod spec;
pub mod status;
pub mod validate;

pub type Result<T> = anyhow::Result<T>;
