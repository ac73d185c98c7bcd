use std::env;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigPaths, LogLevel};

/// Environment variable selecting `pretty` (default) or `json` output.
pub const LOG_FORMAT_VAR: &str = "VALUESPACE_LOG_FORMAT";

fn env_filter(fallback: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback.directive()))
}

fn json_requested() -> bool {
    env::var(LOG_FORMAT_VAR).is_ok_and(|format| format == "json")
}

/// Initialize tracing for the application
///
/// Uses `RUST_LOG` if set, otherwise `level`. Output is pretty console text,
/// or JSON when `VALUESPACE_LOG_FORMAT=json`.
///
/// # Errors
/// Returns error if a global subscriber is already installed
pub fn init(level: LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    let registry = tracing_subscriber::registry().with(env_filter(level));

    if json_requested() {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

/// Initialize tracing for one-shot CLI commands
///
/// Only warnings and errors reach stderr, in compact form, unless
/// `RUST_LOG` says otherwise. Command output on stdout stays clean.
///
/// # Errors
/// Returns error if a global subscriber is already installed
pub fn init_cli_mode() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(env_filter(LogLevel::Warn))
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}

/// Initialize tracing with file output
///
/// Like [`init`], and also writes to a daily-rolling file in the logs
/// directory under the data directory. Used by long-running commands such
/// as `broker serve`.
///
/// # Errors
/// Returns error if the log directory cannot be created or a global
/// subscriber is already installed
pub fn init_with_file(level: LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    const DAYS_TO_KEEP: usize = 7;

    let log_dir = ConfigPaths::log_dir()?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .max_log_files(DAYS_TO_KEEP)
        .filename_prefix("valuespace")
        .filename_suffix("log")
        .build(&log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(env_filter(level));

    if json_requested() {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    std::mem::forget(guard);

    Ok(())
}
