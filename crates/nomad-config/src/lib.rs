//! Configuration management for Nomad nodes
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (NOMAD_* prefix, `__` between section and key)
//! 3. nomad.local.toml (gitignored, local overrides)
//! 4. nomad.toml (git-tracked, project config)
//! 5. ~/.config/nomad/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{Paths, STATE_DIR_NAME};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main Nomad node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadConfig {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub mutation: MutationConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Identity of the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node-1".to_string(),
            hostname: "localhost".to_string(),
            port: 9410,
            data_dir: Paths::default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Fsync after every appended record.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            sync_writes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    File,
    Memory,
}

/// Identity stamped on the protocol messages this node sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub host: String,
    pub user: String,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "nomad".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Report a required zap when joining resets the local history.
    pub zap_on_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NomadConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// A configuration for the named node, everything else defaulted.
    pub fn for_node(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        Self {
            node: NodeConfig {
                name: name.into(),
                hostname: hostname.clone(),
                port,
                ..Default::default()
            },
            mutation: MutationConfig {
                host: hostname,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.node.data_dir.is_relative() {
            self.node.data_dir = base.join(&self.node.data_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("node.name must not be empty".into()));
        }
        if self.node.hostname.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "node.hostname must not be empty".into(),
            ));
        }
        if self.node.port == 0 {
            return Err(ConfigError::ValidationError("node.port must not be 0".into()));
        }
        if self.mutation.host.is_empty() || self.mutation.user.is_empty() {
            return Err(ConfigError::ValidationError(
                "mutation.host and mutation.user must not be empty".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Writes this configuration as the project's nomad.toml.
    pub fn write_project_file(&self, project_dir: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
        let path = Paths::project_config_file(project_dir);
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ConfigError::WriteError {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
