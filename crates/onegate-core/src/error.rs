//! Unified error types for the onegate core.
//!
//! Runtime-level errors (registry, configuration) live in `onegate-runtime`.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Timed out waiting for the peer.
    #[error("operation timed out")]
    Timeout,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Filter Errors
// =============================================================================

/// Errors raised while compiling a filter expression.
///
/// Compilation happens once at instance construction, so these surface as
/// configuration errors rather than per-event failures.
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    /// A logical operator received something other than an array or map.
    #[error("operator '{op}' expects an array or object, got {found}")]
    MalformedLogical {
        /// The operator (`$and`, `$or`, ...).
        op: String,
        /// JSON type name of the offending value.
        found: &'static str,
    },

    /// An operator key that is not recognised.
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    /// A comparison received an operand of the wrong shape.
    #[error("invalid operand for '{op}': {reason}")]
    InvalidOperand {
        /// The comparison operator.
        op: String,
        /// What was wrong with the operand.
        reason: String,
    },

    /// A `$regexp` pattern failed to compile.
    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidRegex {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}

/// Result type for filter compilation.
pub type FilterResult<T> = Result<T, FilterError>;

// =============================================================================
// Connector Errors
// =============================================================================

/// Errors returned by a platform [`Connector`](crate::Connector).
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// The platform does not support this operation.
    #[error("operation '{0}' is not supported by this connector")]
    Unsupported(&'static str),

    /// The addressed entity does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Entity kind (`user`, `group`, `message`, ...).
        kind: &'static str,
        /// Raw platform identifier.
        id: String,
    },

    /// The platform refused the operation.
    #[error("rejected by platform: {0}")]
    Rejected(String),

    /// The account is not connected.
    #[error("account is offline")]
    Offline,

    /// Any other platform failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

// =============================================================================
// Action Errors
// =============================================================================

/// Errors produced while dispatching an action call.
///
/// Every variant maps to a protocol-specific retcode through
/// [`Protocol::retcode`](crate::Protocol::retcode).
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// No handler is registered under the (normalized) action name.
    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    /// The request frame could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A required parameter is absent.
    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    /// A parameter is present but cannot be coerced.
    #[error("invalid parameter '{name}': {reason}")]
    BadParam {
        /// Parameter name.
        name: String,
        /// Why coercion failed.
        reason: String,
    },

    /// The connector failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The handler failed for another reason.
    #[error("{0}")]
    Handler(String),

    /// No access token was supplied.
    #[error("access token required")]
    Unauthorized,

    /// The supplied access token does not match.
    #[error("access token mismatch")]
    Forbidden,
}

impl ActionError {
    /// Shorthand for [`ActionError::BadParam`].
    pub fn bad_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadParam {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for action handlers.
pub type ActionResult<T> = Result<T, ActionError>;
