// Settings errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Cannot read settings: {0}")]
    Read(String),

    /// The file or an override is not valid TOML, JSON or `.env`.
    #[error("Cannot parse settings: {0}")]
    Parse(String),

    /// The merged document does not fit the `Settings` structure.
    #[error("Settings have the wrong shape: {0}")]
    Shape(String),

    /// A value is out of its allowed range.
    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("Environment variable unavailable: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
