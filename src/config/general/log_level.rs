use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Verbosity of log output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failures only.
    Error,

    /// Degraded operation: unreachable layers, rejected writes.
    Warn,

    /// Layer installation and lifecycle (default level).
    #[default]
    Info,

    /// Handle, watch and notification traffic.
    Debug,

    /// Everything.
    Trace,
}

impl LogLevel {
    /// The level as an `EnvFilter` directive.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}
