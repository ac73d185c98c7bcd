use std::sync::Arc;

use super::{WRITE_FILTER, path_arg, split_value_path};
use crate::{
    Publisher,
    cli::{
        CliError, CliSession, Command, CommandResult,
        types::{ArgType, CommandArg, CommandMetadata},
    },
};

/// Removes a value, and everything below it, from the first permanent,
/// writable layer.
pub struct ResetCommand {
    session: Arc<CliSession>,
}

impl ResetCommand {
    /// Creates the command.
    pub fn new(session: Arc<CliSession>) -> Self {
        Self { session }
    }
}

impl Command for ResetCommand {
    fn execute(&self, args: &[String]) -> CommandResult {
        let path = path_arg(args, "reset")?;
        let (parent, name) = split_value_path(&path)?;

        let publisher = Publisher::with_filter(self.session.registry()?, parent, WRITE_FILTER);
        if !publisher.is_connected() {
            return Err(CliError::LayerError(format!(
                "No permanent writable layer accepts '{path}'"
            )));
        }
        let removed = publisher.reset_value(name.as_str());
        publisher.sync();

        Ok(match removed {
            true => format!("{path}: removed"),
            false => format!("{path}: nothing to remove"),
        })
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "reset".to_string(),
            description: "Remove a value from the first permanent writable layer".to_string(),
            category: "value".to_string(),
            args: vec![CommandArg {
                name: "path".to_string(),
                description: "Value path (e.g., /Device/State)".to_string(),
                required: true,
                value_type: ArgType::Path,
            }],
            examples: vec!["valuespace value reset /Device/State".to_string()],
        }
    }
}
