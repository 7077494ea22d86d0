//! Driver configuration: currently only the GC's initial collection
//! threshold, loaded from an optional TOML file. Mirrors `faxt::config`'s
//! load-from-path-or-default shape.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

fn default_initial_threshold() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_initial_threshold")]
    pub initial_threshold_bytes: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold_bytes: default_initial_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gc: GcConfig,
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self, DriverError> {
        let content = std::fs::read_to_string(path).map_err(|source| DriverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| DriverError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_heap_default_threshold() {
        let config = Config::default();
        assert_eq!(config.gc.initial_threshold_bytes, 1024 * 1024);
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.toml");
        std::fs::write(&path, "[gc]\ninitial_threshold_bytes = 4096\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.gc.initial_threshold_bytes, 4096);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Config::load_from_path(Path::new("/nonexistent/ember.toml"));
        assert!(matches!(result, Err(DriverError::Io { .. })));
    }
}
