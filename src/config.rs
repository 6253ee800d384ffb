//! Tool configuration, read from an optional YAML file.
//!
//! Every section and field has a default, so an empty file (or no file) is
//! a valid configuration:
//!
//! retry:
//!   max_attempts: 5          # status writes, conflicts only
//!   initial_delay_ms: 50
//!   backoff_factor: 2.0
//! log:
//!   filter: info             # RUST_LOG wins when set
//!   json: false
//! bundle:
//!   name: rules

use crate::status::RetryConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BundleSettings {
    #[serde(default = "default_bundle_name")]
    pub name: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            name: default_bundle_name(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_bundle_name() -> String {
    "rules".to_string()
}

pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(yaml: &str) -> Result<Config, ConfigError> {
    // An empty document deserializes as null.
    let cfg: Config = if yaml.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "retry.max_attempts must be >= 1".into(),
        ));
    }
    if !(cfg.retry.backoff_factor.is_finite() && cfg.retry.backoff_factor >= 1.0) {
        return Err(ConfigError::Validation(
            "retry.backoff_factor must be finite and >= 1.0".into(),
        ));
    }
    if cfg.log.filter.trim().is_empty() {
        return Err(ConfigError::Validation("log.filter must not be empty".into()));
    }
    if cfg.bundle.name.trim().is_empty() {
        return Err(ConfigError::Validation("bundle.name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = load_from_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(
            cfg.retry.to_retry_config(),
            RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(50),
                backoff_factor: 2.0,
            }
        );
        assert_eq!(cfg.log.filter, "info");
        assert_eq!(cfg.bundle.name, "rules");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = load_from_str("retry:\n  max_attempts: 2\nlog:\n  json: true\n").unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.initial_delay_ms, 50);
        assert!(cfg.log.json);
        assert_eq!(cfg.log.filter, "info");
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = load_from_str("retry:\n  max_attempts: 0\n").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn shrinking_backoff_rejected() {
        let err = load_from_str("retry:\n  backoff_factor: 0.5\n").unwrap_err();
        assert!(err.to_string().contains("backoff_factor"));
    }

    #[test]
    fn unbounded_backoff_rejected() {
        for factor in [".inf", ".nan", "-.inf"] {
            let yaml = format!("retry:\n  backoff_factor: {factor}\n");
            let err = load_from_str(&yaml).unwrap_err();
            assert!(err.to_string().contains("backoff_factor"), "{factor}: {err}");
        }
    }

    #[test]
    fn empty_bundle_name_rejected() {
        let err = load_from_str("bundle:\n  name: \"\"\n").unwrap_err();
        assert!(err.to_string().contains("bundle.name"));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(matches!(
            load_from_str("retry:\n  attempts: 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logrule.yaml");
        std::fs::write(&path, "log:\n  filter: logrule=debug\nbundle:\n  name: tenant-rules\n")
            .unwrap();
        let cfg = load_from_file(&path).unwrap();
        assert_eq!(cfg.log.filter, "logrule=debug");
        assert_eq!(cfg.bundle.name, "tenant-rules");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
