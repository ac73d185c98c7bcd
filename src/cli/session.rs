use std::sync::{Arc, Mutex};

use crate::{LayerRegistry, config::ValueSpaceConfig};

use super::CliError;

/// Configuration and the lazily built layer registry shared by commands.
///
/// Commands that never touch a layer, such as `broker serve` or
/// `config schema`, leave the registry unbuilt.
pub struct CliSession {
    config: ValueSpaceConfig,
    registry: Mutex<Option<Arc<LayerRegistry>>>,
}

impl CliSession {
    /// A session whose registry is built from `config` on first use.
    pub fn new(config: ValueSpaceConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(None),
        }
    }

    /// A session using an already built `registry`.
    pub fn with_registry(config: ValueSpaceConfig, registry: Arc<LayerRegistry>) -> Self {
        Self {
            config,
            registry: Mutex::new(Some(registry)),
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ValueSpaceConfig {
        &self.config
    }

    /// The layer registry, built on first call.
    ///
    /// # Errors
    /// Returns `CliError::ValueSpace` if the registry cannot be built.
    pub fn registry(&self) -> Result<Arc<LayerRegistry>, CliError> {
        let mut registry = match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = registry.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let built = LayerRegistry::from_config(&self.config)?;
        *registry = Some(Arc::clone(&built));
        Ok(built)
    }
}
