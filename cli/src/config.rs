//! CLI Configuration
//!
//! Handles loading and saving protocol configuration from TOML files.

use std::fs;
use std::path::{Path, PathBuf};

use cipherbatch::service::ServiceConfig;
use cipherbatch_oracle::OracleConfig;
use cipherbatch_protocol::{ProtocolConfig, RetentionPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CipherbatchConfig {
    /// Protocol parameters
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Local oracle committee
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Async host settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl CipherbatchConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Explicit file, else the data directory's file, else the local preset
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = default_config_path(data_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::local())
        }
    }

    /// Configuration for a named preset
    pub fn for_preset(preset: &str) -> Result<Self, ConfigError> {
        match preset {
            "local" => Ok(Self::local()),
            "strict" => Ok(Self::strict()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Local development: short cooldown, small committee
    pub fn local() -> Self {
        Self {
            protocol: ProtocolConfig {
                cooldown_secs: 1,
                ..Default::default()
            },
            oracle: OracleConfig {
                committee_size: 3,
                threshold: 2,
                ..Default::default()
            },
            logging: LoggingSettings {
                level: "debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Tight limits and a larger committee
    pub fn strict() -> Self {
        Self {
            protocol: ProtocolConfig {
                cooldown_secs: 300,
                max_markers_per_batch: 50,
                max_commands_per_batch: 50,
                retention: RetentionPolicy {
                    max_contexts: 256,
                    max_age_secs: Some(3_600),
                },
                ..Default::default()
            },
            oracle: OracleConfig {
                committee_size: 7,
                threshold: 5,
                queue_capacity: 64,
            },
            service: ServiceConfig {
                request_timeout_secs: 120,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("protocol: {}", e)))?;
        self.oracle
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("oracle: {}", e)))?;
        self.service
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("service: {}", e)))?;
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level
    pub level: String,

    /// Output format (text, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("io", "cipherbatch", "cipherbatch")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".cipherbatch"))
}

/// Get default config file path
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Get default snapshot path
pub fn default_snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state").join("snapshot.bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CipherbatchConfig::default();
        assert_eq!(config.protocol.cooldown_secs, 60);
        assert_eq!(config.oracle.threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let local = CipherbatchConfig::for_preset("local").unwrap();
        assert_eq!(local.protocol.cooldown_secs, 1);

        let strict = CipherbatchConfig::for_preset("strict").unwrap();
        assert_eq!(strict.oracle.committee_size, 7);
        assert!(strict.validate().is_ok());

        assert!(matches!(
            CipherbatchConfig::for_preset("mainnet"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_save_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = CipherbatchConfig::strict();
        config.save(&path).unwrap();

        let loaded = CipherbatchConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CipherbatchConfig = toml::from_str("[protocol]\ncooldown_secs = 5\n").unwrap();
        assert_eq!(config.protocol.cooldown_secs, 5);
        assert_eq!(config.oracle, OracleConfig::default());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = CipherbatchConfig {
            oracle: OracleConfig {
                committee_size: 2,
                threshold: 5,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            CipherbatchConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
