//! # Configuration
//!
//! Tuning knobs for the index, deserializable from JSON. The demo binary
//! loads `work-index.json` from the working directory when present and falls
//! back to defaults otherwise.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Tuning for the spatial cluster tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Maximum spread a node tolerates before re-clustering, in blocks.
    pub split_threshold: f64,
    /// Number of children a node splits into.
    pub fan_out: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            split_threshold: 16.0,
            fan_out: 4,
        }
    }
}

/// Top-level configuration for a [`crate::coordinator::WorkCoordinator`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Cluster tree tuning applied to every work kind's index.
    pub cluster: ClusterConfig,
}

impl CoordinatorConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&text).map_err(ConfigError::Parse)
    }
}

/// Failure while loading a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file was not valid JSON for the expected shape.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{ "cluster": { "fan_out": 8 } }"#).unwrap();
        assert_eq!(config.cluster.fan_out, 8);
        assert_eq!(config.cluster.split_threshold, 16.0);
    }

    #[test]
    fn empty_json_is_all_defaults() {
        let config: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cluster.fan_out, 4);
    }
}
