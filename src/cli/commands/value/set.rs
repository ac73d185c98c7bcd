use std::sync::Arc;

use super::{WRITE_FILTER, path_arg, split_value_path};
use crate::{
    Publisher, Value,
    cli::{
        CliError, CliSession, Command, CommandResult,
        formatting::format_value,
        types::{ArgType, CommandArg, CommandMetadata},
    },
};

/// Writes a value into the first permanent, writable layer.
///
/// ```bash
/// valuespace value set /Device/State Running
/// valuespace value set /Device/Volume 30
/// ```
pub struct SetCommand {
    session: Arc<CliSession>,
}

impl SetCommand {
    /// Creates the command.
    pub fn new(session: Arc<CliSession>) -> Self {
        Self { session }
    }
}

impl Command for SetCommand {
    fn execute(&self, args: &[String]) -> CommandResult {
        let path = path_arg(args, "set")?;
        let literal = args.get(1).ok_or_else(|| {
            CliError::InvalidArguments("Expected <value> argument for 'set' command".to_string())
        })?;
        let (parent, name) = split_value_path(&path)?;
        let value = Value::parse_literal(literal);

        let publisher = Publisher::with_filter(self.session.registry()?, parent, WRITE_FILTER);
        if !publisher.is_connected() {
            return Err(CliError::LayerError(format!(
                "No permanent writable layer accepts '{path}'"
            )));
        }
        if !publisher.set_value(name.as_str(), value.clone()) {
            return Err(CliError::LayerError(format!("Layer rejected '{path}'")));
        }
        publisher.sync();

        Ok(format!("{}: {}", path, format_value(Some(&value))))
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "set".to_string(),
            description: "Write a value into the first permanent writable layer".to_string(),
            category: "value".to_string(),
            args: vec![
                CommandArg {
                    name: "path".to_string(),
                    description: "Value path (e.g., /Device/State)".to_string(),
                    required: true,
                    value_type: ArgType::Path,
                },
                CommandArg {
                    name: "value".to_string(),
                    description: "true, false, a number, or text; quote to force text"
                        .to_string(),
                    required: true,
                    value_type: ArgType::Value,
                },
            ],
            examples: vec![
                "valuespace value set /Device/State Running".to_string(),
                "valuespace value set /Device/Volume 30".to_string(),
                "valuespace value set /Device/Serial '\"0042\"'".to_string(),
            ],
        }
    }
}
