//! `valuespace`: inspect and edit the shared value space, or host the
//! context broker.

use std::{error::Error, fs, path::PathBuf, process};

use clap::Parser;
use tracing::{info, instrument};
use valuespace::{
    cli::{CliService, CliSession, formatting::format_error},
    config::{ConfigPaths, ValueSpaceConfig},
    tracing_config,
};

#[derive(Parser)]
#[command(name = "valuespace")]
#[command(about = "Hierarchical key/value space shared between processes")]
struct Cli {
    /// Configuration file to use instead of the default location.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Category, command and command arguments, e.g. `value get /Device/State`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ValueSpaceConfig::load(path)?,
        None => {
            ensure_directories()?;
            ValueSpaceConfig::load_default()?
        }
    };

    let category = cli.args.first().map(String::as_str).unwrap_or("help");
    let command = cli.args.get(1).map(String::as_str).unwrap_or("");
    let command_args = cli.args.get(2..).unwrap_or(&[]);

    if (category, command) == ("broker", "serve") {
        tracing_config::init_with_file(config.general.log_level)?;
        info!("Starting context broker host");
    } else {
        tracing_config::init_cli_mode()?;
    }

    let cli_service = CliService::new(CliSession::new(config));

    match cli_service.execute_command(category, command, command_args) {
        Ok(output) => {
            if !output.trim().is_empty() {
                println!("{output}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", format_error("Error"), e);
            process::exit(1);
        }
    }
}

#[instrument]
fn ensure_directories() -> Result<(), Box<dyn Error>> {
    let config_dir = ConfigPaths::config_dir()?;
    if !config_dir.exists() {
        info!("Creating config directory: {}", config_dir.display());
        fs::create_dir_all(&config_dir)?;
    }
    Ok(())
}
