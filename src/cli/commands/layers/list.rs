use std::sync::Arc;

use crate::cli::{
    CliSession, Command, CommandResult,
    formatting::{format_header, format_layer},
    types::CommandMetadata,
};

/// Lists the installed layers in priority order.
///
/// ```bash
/// valuespace layers list
/// ```
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
    fn execute(&self, _args: &[String]) -> CommandResult {
        let registry = self.session.registry()?;

        let mut lines = vec![format_header("Installed layers")];
        if registry.layers().is_empty() {
            lines.push("  (none)".to_string());
        }
        lines.extend(
            registry
                .layers()
                .iter()
                .map(|layer| format_layer(layer.as_ref())),
        );

        Ok(lines.join("\n"))
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "list".to_string(),
            description: "List installed layers, highest priority first".to_string(),
            category: "layers".to_string(),
            args: Vec::new(),
            examples: vec!["valuespace layers list".to_string()],
        }
    }
}
