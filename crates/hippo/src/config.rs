//! Configuration loading and types

use std::path::Path;

use hippo_exec::{AdbConfig, LocalConfig, SshConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration: log level plus any number of named targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HippoConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Configured targets
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// One execution target, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetConfig {
    /// Local machine
    Local(LocalConfig),
    /// Device behind the adb bridge
    Adb(AdbConfig),
    /// Remote host over SSH
    Ssh(SshConfig),
}

impl TargetConfig {
    /// Target name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            TargetConfig::Local(c) => &c.name,
            TargetConfig::Adb(c) => &c.name,
            TargetConfig::Ssh(c) => &c.name,
        }
    }
}

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no target named {0}")]
    UnknownTarget(String),
}

impl Default for HippoConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HippoConfig {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for invalid TOML or unknown target types
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Look up a target by name
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownTarget` if no target has that name
    pub fn target(&self, name: &str) -> Result<&TargetConfig, ConfigError> {
        self.targets
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
    }
}
