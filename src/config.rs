//! Engine configuration.
//!
//! Everything here is plain data that can be deserialized from JSON. The
//! compatibility tables default to the built-in asset unless replaced with
//! [`RemediationConfig::with_tables`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::remediate::compat::CompatibilityTables;

/// Runtime major version assumed when no manifest reveals one.
///
/// The oldest supported LTS line keeps reconciliation conservative.
pub const DEFAULT_RUNTIME_MAJOR: u32 = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Extraction pattern '{name}' is invalid: {message}")]
    InvalidPattern { name: String, message: String },

    #[error("Extraction pattern '{0}' has no 'version' capture group")]
    MissingVersionGroup(String),

    #[error("Unknown family '{family}' referenced by {referenced_by}")]
    UnknownFamily {
        family: String,
        referenced_by: String,
    },
}

/// Knobs for one remediation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Runtime major version used when detection finds nothing
    pub default_runtime_major: u32,

    /// Maximum number of manifests parsed concurrently
    pub parse_concurrency: usize,

    /// Timeout for each pipeline stage, in seconds
    pub stage_timeout_secs: u64,

    /// Whether transitive fixes may add constraint/override blocks
    pub allow_constraints: bool,

    #[serde(skip)]
    tables: Option<Arc<CompatibilityTables>>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            default_runtime_major: DEFAULT_RUNTIME_MAJOR,
            parse_concurrency: 8,
            stage_timeout_secs: 120,
            allow_constraints: true,
            tables: None,
        }
    }
}

impl RemediationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_default_runtime(mut self, major: u32) -> Self {
        self.default_runtime_major = major;
        self
    }

    pub fn with_parse_concurrency(mut self, limit: usize) -> Self {
        self.parse_concurrency = limit.max(1);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_constraints(mut self, allow: bool) -> Self {
        self.allow_constraints = allow;
        self
    }

    /// Replaces the built-in compatibility tables.
    pub fn with_tables(mut self, tables: CompatibilityTables) -> Self {
        self.tables = Some(Arc::new(tables));
        self
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Configured tables, or the built-in asset.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in asset itself is invalid.
    pub fn tables(&self) -> Result<Arc<CompatibilityTables>, ConfigError> {
        match &self.tables {
            Some(tables) => Ok(Arc::clone(tables)),
            None => Ok(Arc::new(CompatibilityTables::builtin()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RemediationConfig::from_json(r#"{"default_runtime_major": 17}"#).unwrap();
        assert_eq!(config.default_runtime_major, 17);
        assert_eq!(config.parse_concurrency, 8);
        assert!(config.allow_constraints);
    }

    #[test]
    fn test_builder_methods() {
        let config = RemediationConfig::default()
            .with_default_runtime(11)
            .with_parse_concurrency(0)
            .with_stage_timeout(Duration::from_secs(30))
            .with_constraints(false);
        assert_eq!(config.default_runtime_major, 11);
        assert_eq!(config.parse_concurrency, 1);
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert!(!config.allow_constraints);
    }

    #[test]
    fn test_builtin_tables_load() {
        let tables = RemediationConfig::default().tables().unwrap();
        assert!(tables.family("spring-framework").is_some());
    }
}
