//! Context broker commands.
mod serve;

use std::sync::Arc;

pub use serve::ServeCommand;

use crate::cli::{CliSession, CommandRegistry};

/// Registers the commands of the "broker" category.
pub fn register_commands(registry: &mut CommandRegistry, _session: &Arc<CliSession>) {
    const CATEGORY_NAME: &str = "broker";

    registry.register_command(CATEGORY_NAME, Box::new(ServeCommand));
}
