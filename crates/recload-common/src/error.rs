//! Error types shared across recload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for configuration and shared utilities
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value at '{path}': expected {expected}")]
    InvalidValue { path: String, expected: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid value error for a configuration path
    pub fn invalid_value(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            expected: expected.into(),
        }
    }
}
