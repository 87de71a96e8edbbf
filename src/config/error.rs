// Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures while assembling the server configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for this schema
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Password file missing or unreadable
    #[error("Cannot load password from {path}: {reason}")]
    Secret { path: PathBuf, reason: String },

    /// Invalid value supplied through the environment or command line
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Merged configuration failed validation
    #[error("Configuration is invalid:\n{0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
