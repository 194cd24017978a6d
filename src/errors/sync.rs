//! Server-side error types
//!
//! Precondition and permission failures surface to the caller as `BAD_REQUEST` and are
//! raised before anything is appended to the mutation log.

use thiserror::Error;

/// Server-side sync errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed request input, rejected before touching the log
    #[error("Validation failed: {0}")]
    Validation(String),

    /// CREATE against a key that already resolves to a value
    #[error("{entity} '{key}' already exists")]
    AlreadyExists {
        /// Entity type
        entity: String,
        /// Entity key
        key: String,
    },

    /// UPDATE or DELETE against a key that resolves to nothing
    #[error("{entity} '{key}' does not exist")]
    NotFound {
        /// Entity type
        entity: String,
        /// Entity key
        key: String,
    },

    /// DELETE by a workspace that did not create the entity
    #[error("Workspace '{workspace}' may not delete {entity} '{key}'")]
    Forbidden {
        /// Entity type
        entity: String,
        /// Entity key
        key: String,
        /// Requesting workspace
        workspace: String,
    },

    /// Recognised collection that the operation does not accept
    #[error("Not implemented: {0}")]
    Unsupported(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Stored payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn already_exists(entity: impl Into<String>, key: impl Into<String>) -> Self {
        SyncError::AlreadyExists {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn forbidden(
        entity: impl Into<String>,
        key: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        SyncError::Forbidden {
            entity: entity.into(),
            key: key.into(),
            workspace: workspace.into(),
        }
    }

    /// Check if the caller is at fault (400-series)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_)
                | SyncError::AlreadyExists { .. }
                | SyncError::NotFound { .. }
                | SyncError::Forbidden { .. }
        )
    }

    /// Check if this is a precondition failure from entity resolution
    pub fn is_precondition(&self) -> bool {
        matches!(self, SyncError::AlreadyExists { .. } | SyncError::NotFound { .. })
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Validation(_)
            | SyncError::AlreadyExists { .. }
            | SyncError::NotFound { .. }
            | SyncError::Forbidden { .. } => "BAD_REQUEST",
            SyncError::Unsupported(_) => "NOT_IMPLEMENTED",
            SyncError::Database(_) | SyncError::Serialization(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

#[cfg(feature = "server")]
mod response {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    };
    use serde_json::json;
    use tracing::error;

    use super::SyncError;

    impl SyncError {
        pub fn status_code(&self) -> StatusCode {
            match self.error_code() {
                "BAD_REQUEST" => StatusCode::BAD_REQUEST,
                "NOT_IMPLEMENTED" => StatusCode::NOT_IMPLEMENTED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for SyncError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Request failed: {}", self);
            }

            let body = json!({
                "code": self.error_code(),
                "message": self.to_string(),
            });

            (status, Json(body)).into_response()
        }
    }
}
