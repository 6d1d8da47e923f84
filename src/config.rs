//! Engine configuration
//!
//! Every optimizer can be switched off individually, which is mostly useful
//! to compare optimized and unoptimized translations. Configuration files are
//! YAML; missing keys take their default value.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML
    #[error("Parse error: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Compiler settings shared by every query of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distribute joins and left joins over unions
    pub distribute_unions: bool,
    /// Peel constant parts off `concat(..) = constant` comparisons
    pub concat_in_equality: bool,
    /// Fold comparisons between constants
    pub constant_folding: bool,
    /// Merge key-equal bindings of the same table
    pub self_join_elimination: bool,
    /// Drop union branches and left joins that can never match
    pub dead_branch_elimination: bool,
    /// Simplify null tests and binders using not-null facts
    pub null_propagation: bool,
    /// Upper bound on optimizer rounds before giving up on a fixpoint
    pub max_optimizer_passes: usize,
    /// Distribution is skipped if it would produce more union branches
    pub max_union_branches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            distribute_unions: true,
            concat_in_equality: true,
            constant_folding: true,
            self_join_elimination: true,
            dead_branch_elimination: true,
            null_propagation: true,
            max_optimizer_passes: 16,
            max_union_branches: 1024,
        }
    }
}

impl EngineConfig {
    /// Configuration with every optimizer disabled
    pub fn unoptimized() -> Self {
        Self {
            distribute_unions: false,
            concat_in_equality: false,
            constant_folding: false,
            self_join_elimination: false,
            dead_branch_elimination: false,
            null_propagation: false,
            ..Self::default()
        }
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
