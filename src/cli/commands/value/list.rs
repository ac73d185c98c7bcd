use std::sync::Arc;

use crate::{
    Path, Subscriber,
    cli::{
        CliSession, Command, CommandResult,
        formatting::{format_header, format_value},
        types::{ArgType, CommandArg, CommandMetadata},
    },
};

/// Lists the children of a path with their merged values.
pub struct ListCommand {
    session: Arc<CliSession>,
}

impl ListCommand {
    /// Creates the command.
    pub fn new(session: Arc<CliSession>) -> Self {
        Self { session }
    }
}

impl Command for ListCommand {
    fn execute(&self, args: &[String]) -> CommandResult {
        let path = Path::new(args.first().map_or("/", String::as_str));
        let subscriber = Subscriber::new(self.session.registry()?, path.clone());

        let mut lines = vec![format_header(&path.to_string())];
        for child in subscriber.sub_paths() {
            let value = subscriber.find_value(child.as_str());
            let rendered = match value {
                Some(value) => format_value(Some(&value)),
                None => "/".to_string(),
            };
            lines.push(format!("  {child} = {rendered}"));
        }

        Ok(lines.join("\n"))
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "list".to_string(),
            description: "List the children of a path".to_string(),
            category: "value".to_string(),
            args: vec![CommandArg {
                name: "path".to_string(),
                description: "Parent path, the root by default".to_string(),
                required: false,
                value_type: ArgType::Path,
            }],
            examples: vec![
                "valuespace value list".to_string(),
                "valuespace value list /Device".to_string(),
            ],
        }
    }
}
