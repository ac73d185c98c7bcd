//! Configuration schema definitions and loading.
//!
//! Defines which layers the Value Space installs, where their substrates
//! live and how the process logs. All sections are optional; a missing
//! file yields the defaults.

mod general;
mod layers;
mod paths;

pub use general::{GeneralConfig, LogLevel};
pub use layers::{
    BrokerBackend, ConfigStoreConfig, ContextBrokerConfig, DocumentStoreConfig, LayersConfig,
    RegistryHiveConfig,
};
pub use paths::ConfigPaths;

use std::{fs, io, path::Path};

use schemars::{JsonSchema, Schema, schema_for};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::debug;

use crate::{Result, ValueSpaceError};

/// Registry-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Run every layer on one dedicated worker thread.
    pub dedicated_worker: bool,
}

/// Main configuration structure for the Value Space.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ValueSpaceConfig {
    /// General application settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Layer registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Per-layer settings.
    #[serde(default)]
    pub layers: LayersConfig,
}

impl ValueSpaceConfig {
    /// Loads the configuration at `path`.
    ///
    /// A missing file is not an error and yields the defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid TOML or does
    /// not match the schema.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ValueSpaceError::IoError {
                    path: path.to_path_buf(),
                    details: e.to_string(),
                });
            }
        };

        Self::parse(&content, Some(path))
    }

    /// Loads the configuration from the default location.
    ///
    /// # Errors
    /// Returns error if no config directory can be determined or loading
    /// fails.
    pub fn load_default() -> Result<Self> {
        let path = ConfigPaths::main_config()?;
        Self::load(&path)
    }

    /// Parses configuration text. `origin` is used in error messages.
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML or does not match the
    /// schema.
    pub fn parse(content: &str, origin: Option<&Path>) -> Result<Self> {
        let value: Value =
            toml::from_str(content).map_err(|e| ValueSpaceError::toml_parse(e, origin))?;

        value
            .try_into()
            .map_err(|e| ValueSpaceError::ConfigValidation {
                component: "config parsing".to_string(),
                details: format!("Configuration validation failed: {e}"),
            })
    }

    /// JSON schema of the configuration file.
    pub fn schema() -> Schema {
        schema_for!(ValueSpaceConfig)
    }
}

#[cfg(test)]
mod tests;
