//! Layer inspection commands.
mod list;

use std::sync::Arc;

pub use list::ListCommand;

use crate::cli::{CliSession, CommandRegistry};

/// Registers the commands of the "layers" category.
pub fn register_commands(registry: &mut CommandRegistry, session: &Arc<CliSession>) {
    const CATEGORY_NAME: &str = "layers";

    registry.register_command(CATEGORY_NAME, Box::new(ListCommand::new(Arc::clone(session))));
}
