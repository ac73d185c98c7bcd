use thiserror::Error;

use crate::ValueSpaceError;

/// Errors that can occur during CLI command execution.
#[derive(Error, Debug)]
pub enum CliError {
    /// A command or category was not found in the registry.
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// Invalid arguments were provided to a command.
    ///
    /// Returned when argument validation fails, such as missing required
    /// arguments, too many arguments, or a path with no value name.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The Value Space could not be brought up or refused an operation.
    #[error("Value space error: {0}")]
    ValueSpace(#[from] ValueSpaceError),

    /// A layer rejected an operation.
    #[error("Layer error: {0}")]
    LayerError(String),

    /// A general service error occurred, such as a runtime or bus failure.
    #[error("Service error: {0}")]
    ServiceError(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Type alias for command execution results.
///
/// All CLI commands return this type: either the text to print or a
/// `CliError` describing what went wrong.
pub type CommandResult = Result<String, CliError>;

/// Specification for a single command argument.
#[derive(Debug, Clone)]
pub struct CommandArg {
    /// The name of the argument (e.g., "path", "value").
    pub name: String,

    /// Human-readable description of what this argument does.
    pub description: String,

    /// Whether this argument is required for command execution.
    pub required: bool,

    /// The expected type of this argument for help display.
    pub value_type: ArgType,
}

/// Type classification for command arguments.
#[derive(Debug, Clone)]
pub enum ArgType {
    /// A general string value.
    String,

    /// A value literal: `true`, `42`, `1.5` or text.
    Value,

    /// A Value Space path.
    Path,
}

impl ArgType {
    /// Placeholder shown in usage lines.
    pub fn hint(&self) -> &'static str {
        match self {
            ArgType::String => "text",
            ArgType::Value => "value",
            ArgType::Path => "path",
        }
    }
}

/// Complete metadata for a CLI command.
///
/// Single source of truth for a command's identity, arguments and usage
/// examples. Used for help generation and argument validation.
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    /// The command name (e.g., "get", "set", "watch").
    pub name: String,

    /// Brief description of what this command does.
    pub description: String,

    /// Specification of all arguments this command accepts.
    pub args: Vec<CommandArg>,

    /// Example usage strings to show in help text.
    pub examples: Vec<String>,

    /// Category this command belongs to (e.g., "value", "layers").
    pub category: String,
}

/// Trait defining the interface for all CLI commands.
///
/// Commands receive their dependencies through their constructors.
pub trait Command: Send + Sync {
    /// Executes the command with the provided arguments.
    ///
    /// The registry has already checked the argument count against
    /// [`metadata`](Self::metadata).
    ///
    /// # Errors
    ///
    /// Returns `CliError` for invalid argument values, an unavailable
    /// Value Space or a failing layer.
    fn execute(&self, args: &[String]) -> CommandResult;

    /// Returns the complete metadata for this command.
    fn metadata(&self) -> CommandMetadata;
}
