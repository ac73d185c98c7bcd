use std::{
    fmt, io,
    path::{Path, PathBuf},
    result,
};

use thiserror::Error;

use crate::layer::LayerId;

/// Error types for the Value Space.
///
/// Only construction-time failures surface as errors: loading configuration,
/// installing layers and claiming the process registry. Runtime reads and
/// writes degrade to "not found" or `false` instead.
#[derive(Error, Debug)]
pub enum ValueSpaceError {
    /// Configuration validation error
    #[error("configuration validation failed for '{component}': {details}")]
    ConfigValidation {
        /// Component that failed validation
        component: String,
        /// Validation error details
        details: String,
    },

    /// I/O operation error
    #[error("I/O error on '{path}': {details}")]
    IoError {
        /// Path where I/O error occurred
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// Standard I/O operation error (for compatibility)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TOML parsing error with location context
    #[error("failed to parse TOML at '{location}': {details}")]
    TomlParseError {
        /// Location of TOML being parsed (file path or "string")
        location: String,
        /// Parse error details
        details: String,
    },

    /// A layer could not be brought up
    #[error("failed to initialize layer '{layer}': {details}")]
    LayerInit {
        /// Name of the layer
        layer: String,
        /// Initialization error details
        details: String,
    },

    /// Two layers were installed with the same identity
    #[error("layer {0} is installed twice")]
    DuplicateLayer(LayerId),

    /// Another registry already owns this process
    #[error("a layer registry is already active in this process")]
    RegistryActive,

    /// The layer worker thread is gone
    #[error("layer worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// A specialized `Result` type for Value Space operations.
pub type Result<T> = result::Result<T, ValueSpaceError>;

impl ValueSpaceError {
    /// Creates a TOML parsing error with optional file path context.
    ///
    /// # Arguments
    ///
    /// * `error` - The underlying parsing error
    /// * `path` - Optional path to the file that failed to parse
    pub fn toml_parse(error: impl fmt::Display, path: Option<&Path>) -> Self {
        let location = match path {
            Some(p) => p.to_string_lossy().to_string(),
            None => "string".to_string(),
        };

        ValueSpaceError::TomlParseError {
            location,
            details: error.to_string(),
        }
    }

    /// Creates a layer initialization error.
    pub fn layer_init(layer: &str, error: impl fmt::Display) -> Self {
        ValueSpaceError::LayerInit {
            layer: layer.to_string(),
            details: error.to_string(),
        }
    }
}
