//! Engine configuration: default strategy and checkpoint settings.
//!
//! The configuration file is YAML (JSON is accepted as well) and lives at
//! `$CHUNKFLOW_CONFIG_PATH` when set, or `<config dir>/chunkflow/config.yaml` otherwise. A
//! missing file is not an error; every field has a default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chunkflow_types::ChunkStrategyKind;
use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CHUNKFLOW_CONFIG_PATH";

/// Default filename inside the per-user configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings shared by every run started from the same configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Strategy used when a pipeline does not name one.
    pub strategy: ChunkStrategyKind,
    pub checkpoint: CheckpointConfig,
}

/// Where and whether checkpoints are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Directory for JSON checkpoint files; tilde-expanded on load.
    pub directory: Option<PathBuf>,
}

/// Returns the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chunkflow")
        .join(CONFIG_FILE_NAME)
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads configuration from `path`, returning defaults when the file does not exist.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file; using defaults");
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        return Ok(EngineConfig::default());
    }

    let mut config: EngineConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(directory) = config.checkpoint.directory.take() {
        config.checkpoint.directory = Some(expand_tilde(&directory.to_string_lossy()));
    }
    Ok(config)
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_path_honors_environment_override() {
        let override_path = "~/custom/chunkflow/config.yaml";
        temp_env::with_var(CONFIG_PATH_ENV, Some(override_path), || {
            assert_eq!(default_config_path(), expand_tilde(override_path));
        });
    }

    #[test]
    fn default_path_ignores_blank_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("  "), || {
            assert!(default_config_path().ends_with("chunkflow/config.yaml"));
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.yaml")).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.strategy, ChunkStrategyKind::RoundRobin);
        assert!(!config.checkpoint.enabled);
    }

    #[test]
    fn parses_yaml_and_expands_checkpoint_directory() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "strategy: balanced\ncheckpoint:\n  enabled: true\n  directory: ~/chunkflow/checkpoints\n").expect("write");

        let config = load_config_from_path(&path).expect("config");
        assert_eq!(config.strategy, ChunkStrategyKind::Balanced);
        assert!(config.checkpoint.enabled);
        assert_eq!(config.checkpoint.directory, Some(expand_tilde("~/chunkflow/checkpoints")));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"checkpoint": {"enabled": true}}"#).expect("write");

        let config = load_config_from_path(&path).expect("config");
        assert_eq!(config.strategy, ChunkStrategyKind::RoundRobin);
        assert!(config.checkpoint.enabled);
        assert!(config.checkpoint.directory.is_none());
    }

    #[test]
    fn malformed_document_reports_path() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "strategy: [").expect("write");

        let error = load_config_from_path(&path).expect_err("malformed");
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("config.yaml"));
    }
}
