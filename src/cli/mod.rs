//! Command-line interface for the Value Space.
//!
//! Provides a hierarchical command system for inspecting layers and for
//! reading, writing and watching values. Commands are organized by
//! category and generate their help text from metadata.

mod commands;
pub mod formatting;
mod registry;
mod service;
mod session;
mod types;

#[cfg(test)]
mod tests;

pub use commands::value::{GetCommand, SetCommand, WRITE_FILTER};
pub use registry::CommandRegistry;
pub use service::CliService;
pub use session::CliSession;
pub use types::{ArgType, CliError, Command, CommandArg, CommandMetadata, CommandResult};
