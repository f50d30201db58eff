//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read or write the configuration file.
    #[error("Configuration file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing or extraction failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Serializing a snapshot failed.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// Missing required field.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Two accounts share a platform and id.
    #[error("Duplicate account: {0}")]
    DuplicateAccount(String),

    /// Protocol keys look like `onebot.v11`.
    #[error("Invalid protocol key '{0}', expected '<protocol>.<version>'")]
    InvalidProtocolKey(String),

    /// Invalid URL format.
    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A filter expression does not compile.
    #[error("Invalid filter in {key}: {reason}")]
    InvalidFilter { key: String, reason: String },
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
