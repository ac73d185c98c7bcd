use std::sync::Arc;

use tracing::info;

use crate::{
    cli::{CliError, Command, CommandResult, types::CommandMetadata},
    layer::context::{BROKER_SERVICE, BrokerService, LocalBroker},
};

/// Hosts the context broker on the session bus until interrupted.
///
/// ```bash
/// valuespace broker serve
/// ```
pub struct ServeCommand;

impl Command for ServeCommand {
    fn execute(&self, _args: &[String]) -> CommandResult {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| CliError::ServiceError(format!("Failed to create runtime: {e}")))?;

        runtime.block_on(async {
            let broker = Arc::new(LocalBroker::new());
            let _connection = BrokerService::serve(broker)
                .await
                .map_err(|e| CliError::ServiceError(format!("Cannot host the broker: {e}")))?;

            info!(service = BROKER_SERVICE, "Context broker serving");
            println!("Serving {BROKER_SERVICE} on the session bus");
            println!("Press Ctrl+C to stop");

            tokio::signal::ctrl_c().await?;
            Ok::<_, CliError>(())
        })?;

        Ok("Broker stopped".to_string())
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "serve".to_string(),
            description: "Host the context broker on the session bus".to_string(),
            category: "broker".to_string(),
            args: Vec::new(),
            examples: vec!["valuespace broker serve".to_string()],
        }
    }
}
