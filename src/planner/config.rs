//! Optimizer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::bitset::RelationSet;

/// Tunables for one optimizer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Largest number of relations one join region may hold.
    pub max_join_relations: usize,
    /// Deepest chain of derived tables planned in context.
    pub max_nesting_depth: usize,
    /// Cap on candidate join pairs evaluated per region.
    pub enumeration_limit: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_join_relations: RelationSet::CAPACITY,
            max_nesting_depth: 32,
            enumeration_limit: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl OptimizerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_enumeration_limit(mut self, limit: u64) -> Self {
        self.enumeration_limit = Some(limit);
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_join_relations == 0 || self.max_join_relations > RelationSet::CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "max_join_relations must be between 1 and {}, got {}",
                RelationSet::CAPACITY,
                self.max_join_relations
            )));
        }
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_nesting_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
