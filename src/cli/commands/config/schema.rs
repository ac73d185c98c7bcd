use crate::{
    cli::{CliError, Command, CommandResult, types::CommandMetadata},
    config::ValueSpaceConfig,
};

/// Prints the JSON schema of the configuration file.
pub struct SchemaCommand;

impl Command for SchemaCommand {
    fn execute(&self, _args: &[String]) -> CommandResult {
        serde_json::to_string_pretty(&ValueSpaceConfig::schema())
            .map_err(|e| CliError::ServiceError(format!("Failed to render schema: {e}")))
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "schema".to_string(),
            description: "Print the JSON schema of config.toml".to_string(),
            category: "config".to_string(),
            args: Vec::new(),
            examples: vec!["valuespace config schema > valuespace.schema.json".to_string()],
        }
    }
}
