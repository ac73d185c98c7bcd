use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn enabled() -> bool {
    true
}

/// Settings of the TOML configuration store layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ConfigStoreConfig {
    /// Install this layer.
    pub enabled: bool,
    /// Priority rank override; lower wins.
    pub order: Option<u32>,
    /// Store file; defaults to `store.toml` in the config directory.
    pub file: Option<PathBuf>,
    /// Quiet period before external edits are reloaded, in milliseconds.
    /// Zero disables watching.
    pub watch_debounce_ms: u64,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        Self {
            enabled: enabled(),
            order: None,
            file: None,
            watch_debounce_ms: 200,
        }
    }
}

/// Settings of one registry hive layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RegistryHiveConfig {
    /// Install this layer.
    pub enabled: bool,
    /// Priority rank override; lower wins.
    pub order: Option<u32>,
    /// Hive file; defaults to the runtime directory for the volatile hive
    /// and the data directory for the non-volatile one.
    pub file: Option<PathBuf>,
    /// Quiet period before external edits are reloaded, in milliseconds.
    /// Zero disables watching.
    pub watch_debounce_ms: u64,
}

impl Default for RegistryHiveConfig {
    fn default() -> Self {
        Self {
            enabled: enabled(),
            order: None,
            file: None,
            watch_debounce_ms: 100,
        }
    }
}

/// Where the context broker lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BrokerBackend {
    /// A broker service on the session bus, shared by every process.
    #[default]
    SessionBus,
    /// A broker private to this process.
    Local,
}

/// Settings of the context broker layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ContextBrokerConfig {
    /// Install this layer.
    pub enabled: bool,
    /// Priority rank override; lower wins.
    pub order: Option<u32>,
    /// Broker to connect to.
    pub backend: BrokerBackend,
    /// Timeout for a single broker call, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for ContextBrokerConfig {
    fn default() -> Self {
        Self {
            enabled: enabled(),
            order: None,
            backend: BrokerBackend::default(),
            call_timeout_ms: 2000,
        }
    }
}

/// Settings of the document store layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct DocumentStoreConfig {
    /// Install this layer.
    pub enabled: bool,
    /// Priority rank override; lower wins.
    pub order: Option<u32>,
    /// Document file; defaults to `documents.json` in the data directory.
    pub file: Option<PathBuf>,
    /// Document type holding the settings.
    pub document_type: String,
    /// Allow writes to create documents and removals to delete them.
    pub allow_create: bool,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            enabled: enabled(),
            order: None,
            file: None,
            document_type: crate::layer::document::DocumentSettings::DEFAULT_TYPE.to_string(),
            allow_create: false,
        }
    }
}

/// Per-layer settings, one table per layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(default)]
pub struct LayersConfig {
    /// `[layers.registry_volatile]`
    pub registry_volatile: RegistryHiveConfig,
    /// `[layers.context_broker]`
    pub context_broker: ContextBrokerConfig,
    /// `[layers.config_store]`
    pub config_store: ConfigStoreConfig,
    /// `[layers.registry_nonvolatile]`
    pub registry_nonvolatile: RegistryHiveConfig,
    /// `[layers.document_store]`
    pub document_store: DocumentStoreConfig,
}
