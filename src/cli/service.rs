use std::sync::Arc;

use super::{
    CliError, CliSession, CommandRegistry,
    formatting::{
        format_category, format_command, format_description, format_header, format_subheader,
    },
};

/// High-level service for managing and executing CLI commands.
///
/// Commands are organized by category and can be listed or executed by name.
pub struct CliService {
    registry: CommandRegistry,
}

impl CliService {
    /// Creates a CLI service with all built-in commands registered.
    pub fn new(session: CliSession) -> Self {
        let mut registry = CommandRegistry::new(Arc::new(session));
        registry.register_all_commands();

        CliService { registry }
    }

    /// Executes a command by category and name with the provided arguments.
    ///
    /// `help` as category, or an empty command name, prints help instead.
    ///
    /// # Errors
    /// Returns `CliError::CommandNotFound` if the command doesn't exist in
    /// the category, or whatever the command itself reports.
    pub fn execute_command(
        &self,
        category: &str,
        command_name: &str,
        args: &[String],
    ) -> Result<String, CliError> {
        match (category, command_name) {
            ("help", "") => Ok(self.help()),
            ("help", category) => self.category_help(category),
            (category, "") => self.category_help(category),
            (category, command_name) => self.registry.execute(category, command_name, args),
        }
    }

    /// Lists all available commands organized by category.
    pub fn list_all(&self) -> Vec<(String, Vec<String>)> {
        self.registry.list_commands()
    }

    /// Overview of every category and command.
    pub fn help(&self) -> String {
        let mut lines = vec![
            format_header("valuespace"),
            format_description("Inspect and edit the shared value space"),
            String::new(),
            format_subheader("Usage: valuespace [--config <file>] <category> <command> [args]"),
            String::new(),
        ];

        for (category, commands) in self.list_all() {
            lines.push(format_category(&category));
            for command in commands {
                let description = self
                    .registry
                    .metadata(&category, &command)
                    .map(|metadata| metadata.description)
                    .unwrap_or_default();
                lines.push(format!(
                    "  {:<8} {}",
                    format_command(&command),
                    format_description(&description)
                ));
            }
        }

        lines.join("\n")
    }

    fn category_help(&self, category: &str) -> Result<String, CliError> {
        let (_, commands) = self
            .list_all()
            .into_iter()
            .find(|(name, _)| name == category)
            .ok_or_else(|| {
                CliError::CommandNotFound(format!("Failed to find category '{category}'"))
            })?;

        let mut lines = vec![format_header(category)];
        for command in commands {
            let metadata = self.registry.metadata(category, &command)?;
            let usage: Vec<String> = metadata
                .args
                .iter()
                .map(|arg| match arg.required {
                    true => format!("<{}:{}>", arg.name, arg.value_type.hint()),
                    false => format!("[{}:{}]", arg.name, arg.value_type.hint()),
                })
                .collect();

            lines.push(format!(
                "  {} {}",
                format_command(&metadata.name),
                usage.join(" ")
            ));
            lines.push(format!("      {}", format_description(&metadata.description)));
            for example in &metadata.examples {
                lines.push(format!("      {}", format_description(example)));
            }
        }

        Ok(lines.join("\n"))
    }
}
