//! Value commands: read, write and watch paths.
mod get;
mod list;
mod reset;
mod set;
mod watch;

use std::sync::Arc;

pub use get::GetCommand;
pub use list::ListCommand;
pub use reset::ResetCommand;
pub use set::SetCommand;
pub use watch::WatchCommand;

use crate::{
    Path,
    cli::{CliError, CliSession, CommandRegistry},
    layer::LayerOptions,
};

/// Layers `value set` and `value reset` write to.
pub const WRITE_FILTER: LayerOptions = LayerOptions::PERMANENT.union(LayerOptions::WRITABLE);

/// Registers the commands of the "value" category.
pub fn register_commands(registry: &mut CommandRegistry, session: &Arc<CliSession>) {
    const CATEGORY_NAME: &str = "value";

    registry.register_command(CATEGORY_NAME, Box::new(GetCommand::new(Arc::clone(session))));
    registry.register_command(CATEGORY_NAME, Box::new(SetCommand::new(Arc::clone(session))));
    registry.register_command(CATEGORY_NAME, Box::new(ResetCommand::new(Arc::clone(session))));
    registry.register_command(CATEGORY_NAME, Box::new(ListCommand::new(Arc::clone(session))));
    registry.register_command(CATEGORY_NAME, Box::new(WatchCommand::new(Arc::clone(session))));
}

/// Splits `/Device/State` into `/Device` and `State`.
pub(crate) fn split_value_path(text: &str) -> Result<(Path, String), CliError> {
    let path = Path::new(text);
    let name = path
        .last()
        .ok_or_else(|| CliError::InvalidArguments(format!("'{text}' names no value")))?
        .to_string();
    Ok((path.parent(), name))
}

fn path_arg(args: &[String], command: &str) -> Result<String, CliError> {
    args.first().cloned().ok_or_else(|| {
        CliError::InvalidArguments(format!("Expected <path> argument for '{command}' command"))
    })
}
