//! Configuration commands.
mod schema;

use std::sync::Arc;

pub use schema::SchemaCommand;

use crate::cli::{CliSession, CommandRegistry};

/// Registers the commands of the "config" category.
pub fn register_commands(registry: &mut CommandRegistry, _session: &Arc<CliSession>) {
    const CATEGORY_NAME: &str = "config";

    registry.register_command(CATEGORY_NAME, Box::new(SchemaCommand));
}
