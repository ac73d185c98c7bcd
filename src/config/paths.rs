use std::{
    env,
    io::{Error, ErrorKind},
    path::PathBuf,
};

const APP_DIR: &str = "valuespace";

/// Locates configuration, data and runtime directories.
///
/// Follows the XDG Base Directory specification.
pub struct ConfigPaths;

impl ConfigPaths {
    /// Returns the configuration directory.
    ///
    /// - First checks `XDG_CONFIG_HOME`
    /// - Falls back to `$HOME/.config`
    ///
    /// # Errors
    /// Returns an error if neither `XDG_CONFIG_HOME` nor `HOME` is set
    pub fn config_dir() -> Result<PathBuf, Error> {
        Self::xdg_dir("XDG_CONFIG_HOME", ".config")
    }

    /// Returns the data directory, home of the permanent substrates.
    ///
    /// - First checks `XDG_DATA_HOME`
    /// - Falls back to `$HOME/.local/share`
    ///
    /// # Errors
    /// Returns an error if neither `XDG_DATA_HOME` nor `HOME` is set
    pub fn data_dir() -> Result<PathBuf, Error> {
        Self::xdg_dir("XDG_DATA_HOME", ".local/share")
    }

    /// Returns the runtime directory, home of the volatile substrates.
    ///
    /// Uses `XDG_RUNTIME_DIR` and falls back to the system temp directory.
    pub fn runtime_dir() -> PathBuf {
        match env::var("XDG_RUNTIME_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join(APP_DIR),
            _ => env::temp_dir().join(APP_DIR),
        }
    }

    /// Returns the log directory, creating it if needed.
    ///
    /// # Errors
    /// Returns error if the data directory is unknown or cannot be created
    pub fn log_dir() -> Result<PathBuf, Error> {
        let log_dir = Self::data_dir()?.join("logs");

        if !log_dir.exists() {
            std::fs::create_dir_all(&log_dir)?;
        }

        Ok(log_dir)
    }

    /// Returns the path to the main configuration file.
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined
    pub fn main_config() -> Result<PathBuf, Error> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Default file of the configuration store layer.
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined
    pub fn config_store() -> Result<PathBuf, Error> {
        Ok(Self::config_dir()?.join("store.toml"))
    }

    /// Default file of the volatile registry hive.
    pub fn volatile_hive() -> PathBuf {
        Self::runtime_dir().join("volatile.json")
    }

    /// Default file of the non-volatile registry hive.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be determined
    pub fn nonvolatile_hive() -> Result<PathBuf, Error> {
        Ok(Self::data_dir()?.join("registry.json"))
    }

    /// Default file of the document store.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be determined
    pub fn documents() -> Result<PathBuf, Error> {
        Ok(Self::data_dir()?.join("documents.json"))
    }

    fn xdg_dir(variable: &str, home_fallback: &str) -> Result<PathBuf, Error> {
        let base = env::var(variable)
            .ok()
            .filter(|dir| !dir.is_empty())
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| format!("{home}/{home_fallback}"))
            })
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("Neither {variable} nor HOME environment variable found"),
                )
            })?;

        Ok(PathBuf::from(base).join(APP_DIR))
    }
}
