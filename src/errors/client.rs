//! Client-side error types
//!
//! Remote failures are classified with [`ClientError::is_retryable`]: a transport failure
//! without structured error data, HTTP 429, or an `INTERNAL_SERVER_ERROR` code are retried;
//! everything else is terminal and rolls the optimistic change back.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Request never produced a structured error (network failure, unreadable body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with HTTP 429
    #[error("Rate limited by server")]
    RateLimited,

    /// Server answered with a structured error
    #[error("Remote error {code} ({status}): {message}")]
    Remote {
        /// Error code from the response body
        code: String,
        /// HTTP status
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Local input rejected before any optimistic change was applied
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Write to an immutable field after construction
    #[error("Field '{field}' of {model} is immutable")]
    ImmutableField {
        /// Model name
        model: String,
        /// Field name
        field: String,
    },

    /// Field not declared by the model schema
    #[error("{model} has no field '{field}'")]
    UnknownField {
        /// Model name
        model: String,
        /// Field name
        field: String,
    },

    /// Relation target is not loaded into the pool
    #[error("Could not resolve {model} '{id}' in pool")]
    RelationUnresolved {
        /// Target model name
        model: String,
        /// Target id
        id: String,
    },

    /// Entity is not registered in the pool
    #[error("{model} '{id}' is not in the pool")]
    NotInPool {
        /// Model name
        model: String,
        /// Entity id
        id: String,
    },

    /// Entity with the same identity is already registered
    #[error("{model} '{id}' is already in the pool")]
    DuplicateIdentity {
        /// Model name
        model: String,
        /// Entity id
        id: String,
    },

    /// The pool was torn down
    #[error("Object pool is closed")]
    PoolClosed,

    /// Record could not be decoded from entity fields or a response body
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn remote(code: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ClientError::Remote {
            code: code.into(),
            status,
            message: message.into(),
        }
    }

    /// Retry predicate for remote mutation failures
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::RateLimited => true,
            ClientError::Remote { code, .. } => code == "INTERNAL_SERVER_ERROR",
            _ => false,
        }
    }

    /// Failure reported by the server rather than produced locally
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::RateLimited | ClientError::Remote { .. }
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
