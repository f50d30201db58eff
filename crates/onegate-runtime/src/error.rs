//! Runtime error types.

use thiserror::Error;

use onegate_core::{FilterError, TransportError};

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No factory is registered for the protocol key.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// An instance's filter expression does not compile.
    #[error("Invalid filter for {key}: {source}")]
    InvalidFilter {
        key: String,
        #[source]
        source: FilterError,
    },

    /// An instance's configuration could not be deserialized.
    #[error("Invalid configuration for {key}: {reason}")]
    InstanceConfig { key: String, reason: String },

    /// Account already registered.
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Every instance of an account failed to start.
    #[error("No protocol instance of {0} could be started")]
    StartFailed(String),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
