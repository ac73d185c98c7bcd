use std::sync::Arc;

use super::{path_arg, split_value_path};
use crate::{
    Subscriber,
    cli::{
        CliSession, Command, CommandResult,
        formatting::format_value,
        types::{ArgType, CommandArg, CommandMetadata},
    },
};

/// Reads the merged value of a path.
///
/// ```bash
/// valuespace value get /Device/State
/// ```
pub struct GetCommand {
    session: Arc<CliSession>,
}

impl GetCommand {
    /// Creates the command.
    pub fn new(session: Arc<CliSession>) -> Self {
        Self { session }
    }
}

impl Command for GetCommand {
    fn execute(&self, args: &[String]) -> CommandResult {
        let path = path_arg(args, "get")?;
        let (parent, name) = split_value_path(&path)?;

        let subscriber = Subscriber::new(self.session.registry()?, parent);
        let value = subscriber.find_value(name.as_str());

        Ok(format!("{}: {}", path, format_value(value.as_ref())))
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "get".to_string(),
            description: "Read a value from the highest-priority layer holding it".to_string(),
            category: "value".to_string(),
            args: vec![CommandArg {
                name: "path".to_string(),
                description: "Value path (e.g., /Device/State)".to_string(),
                required: true,
                value_type: ArgType::Path,
            }],
            examples: vec![
                "valuespace value get /Device/State".to_string(),
                "valuespace value get /Device/Network/Up".to_string(),
            ],
        }
    }
}
