//! Error types for the warm transfer client core
//!
//! Every fallible operation in this crate returns [`ClientResult`]. The
//! variants map onto the four failure classes the session layer cares about:
//!
//! - **Validation** - a required local input (room, identity, target) is
//!   missing. Never reaches the network.
//! - **Transport** - connecting to the room, publishing, or disconnecting failed.
//! - **Backend** - the token/transfer/summary service answered with a non-2xx
//!   status, was unreachable, or left out a field we need.
//! - **Decode** - an inbound broadcast payload could not be decoded. The
//!   message bus swallows these; they never surface to callers.
//!
//! None of these are fatal: a session stays usable after any of them and the
//! caller may retry.
//!
//! ```rust
//! use warmline_client_core::{ClientError, ErrorCategory};
//!
//! let err = ClientError::validation("Missing room, your identity, or target identity.");
//! assert_eq!(err.category(), ErrorCategory::Validation);
//! assert!(!err.is_recoverable());
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client core
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// A required local input is missing or malformed
    #[error("{message}")]
    Validation { message: String },

    /// Connection, publish or disconnect failure on the real-time transport
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The backend rejected the request or returned an unusable response
    #[error("{detail}")]
    Backend {
        /// HTTP status, when a response was received at all
        status: Option<u16>,
        /// Server-provided detail, or a local description of what was missing
        detail: String,
    },

    /// An inbound payload could not be decoded
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The transfer protocol refused the request
    #[error("{message}")]
    Transfer { message: String },

    /// The operation does not make sense in the current session state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The session was torn down while the operation was in flight
    #[error("Session ended before the operation completed")]
    SessionEnded,

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a backend error
    pub fn backend(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Backend { status, detail: detail.into() }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Create a transfer error
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer { message: message.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether retrying the same operation later can succeed
    ///
    /// Transport and backend failures are transient from the point of view of
    /// this layer. Everything else needs different input or a different state.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Backend { .. } => true,
            // A transfer blocked by an in-flight attempt can be retried once it settles
            Self::Transfer { .. } => true,
            Self::Validation { .. }
            | Self::Decode { .. }
            | Self::InvalidState { .. }
            | Self::SessionEnded
            | Self::Configuration { .. } => false,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::Transfer { .. } => ErrorCategory::Transfer,
            Self::InvalidState { .. } | Self::SessionEnded => ErrorCategory::State,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed local input
    Validation,
    /// Real-time transport failures
    Transport,
    /// HTTP backend failures
    Backend,
    /// Malformed inbound payloads
    Decode,
    /// Transfer protocol refusals
    Transfer,
    /// Session lifecycle misuse
    State,
    /// Configuration problems
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Transport => write!(f, "transport"),
            Self::Backend => write!(f, "backend"),
            Self::Decode => write!(f, "decode"),
            Self::Transfer => write!(f, "transfer"),
            Self::State => write!(f, "state"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode { message: error.to_string() }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Backend {
            status: error.status().map(|s| s.as_u16()),
            detail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ClientError::transport("room not reachable");
        assert!(matches!(err, ClientError::Transport { .. }));
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(err.to_string(), "Transport error: room not reachable");
    }

    #[test]
    fn test_backend_detail_is_verbatim() {
        let err = ClientError::backend(Some(404), "Target agent not found");
        assert_eq!(err.to_string(), "Target agent not found");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(ClientError::backend(None, "connection refused").is_recoverable());
        assert!(ClientError::transfer("transfer already in progress").is_recoverable());
        assert!(!ClientError::validation("missing room").is_recoverable());
        assert!(!ClientError::decode("bad json").is_recoverable());
        assert!(!ClientError::SessionEnded.is_recoverable());
    }

    #[test]
    fn test_json_errors_are_decode_errors() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: ClientError = parse.unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Decode);
    }
}
