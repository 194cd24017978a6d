//! Error types for the sync engine
//!
//! # Error Categories
//!
//! - **SyncError**: server side failures (validation, preconditions, ownership, storage)
//! - **ClientError**: client side failures, including the retry classification used by the
//!   optimistic mutation coordinator
//! - **NotifyError**: failures delivering a poke; always logged, never surfaced to callers
//!
//! # Examples
//!
//! ```rust
//! use luminar::errors::{ClientError, SyncError};
//!
//! let err = SyncError::not_found("ISSUE", "I1");
//! assert_eq!(err.error_code(), "BAD_REQUEST");
//!
//! assert!(ClientError::RateLimited.is_retryable());
//! ```

pub mod client;
pub mod notify;
pub mod sync;

pub use client::ClientError;
pub use notify::NotifyError;
pub use sync::SyncError;

/// Result type alias for server operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
