//! Configuration file handling for `~/.strongroom/config.ini`.

use super::defaults::state_dir;
use super::parser::parse_ini;
use super::settings::Config;
use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the INI file.
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Returns the default config file path (`~/.strongroom/config.ini`).
pub fn config_file_path() -> PathBuf {
    state_dir().join("config.ini")
}

impl Config {
    /// Loads configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads configuration from a specific path.
    ///
    /// A missing file yields the defaults; any present key overlays them.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }
}
