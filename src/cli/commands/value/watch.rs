use std::sync::Arc;

use futures::StreamExt;

use super::{path_arg, split_value_path};
use crate::{
    Subscriber,
    cli::{
        CliError, CliSession, Command, CommandResult,
        formatting::format_value,
        types::{ArgType, CommandArg, CommandMetadata},
    },
};

/// Prints a value every time any layer reports a change to it.
pub struct WatchCommand {
    session: Arc<CliSession>,
}

impl WatchCommand {
    /// Creates the command.
    pub fn new(session: Arc<CliSession>) -> Self {
        Self { session }
    }
}

impl Command for WatchCommand {
    fn execute(&self, args: &[String]) -> CommandResult {
        let path = path_arg(args, "watch")?;
        let (parent, name) = split_value_path(&path)?;
        let subscriber = Subscriber::new(self.session.registry()?, parent);

        println!("Watching changes on path '{path}'...");
        println!("Press Ctrl+C to stop");

        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| CliError::ServiceError(format!("Failed to create runtime: {e}")))?;

        runtime.block_on(async {
            let mut changes = subscriber.contents_changed();
            println!(
                "{}: {}",
                path,
                format_value(subscriber.find_value(name.as_str()).as_ref())
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    change = changes.next() => match change {
                        Some(()) => println!(
                            "{}: {}",
                            path,
                            format_value(subscriber.find_value(name.as_str()).as_ref())
                        ),
                        None => break,
                    },
                }
            }
        });

        Ok("Watch ended".to_string())
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "watch".to_string(),
            description: "Print a value whenever it changes in any layer".to_string(),
            category: "value".to_string(),
            args: vec![CommandArg {
                name: "path".to_string(),
                description: "Value path to watch".to_string(),
                required: true,
                value_type: ArgType::Path,
            }],
            examples: vec!["valuespace value watch /Device/State".to_string()],
        }
    }
}
