//! Common error types for the scheduling import services
//!
//! Every failure is classified into one of five kinds so callers can tell
//! "absent or expired" apart from "try again later" apart from "give up".

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification used for retry and reporting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input (out-of-range threshold, missing required field)
    Validation,
    /// Unknown or expired job/session
    NotFound,
    /// Duplicate or constraint violation surfaced from a downstream store
    Conflict,
    /// Dependency timeout or unavailability, eligible for retry
    Transient,
    /// Exhausted retries or unrecoverable state
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Common error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid user input or request parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource not found (or expired)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate or constraint violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dependency timeout or temporary unavailability
    #[error("Transient error: {0}")]
    Transient(String),

    /// Unrecoverable failure
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization of persisted records
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error into the five reporting kinds
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Fatal(_) | Error::Serialization(_) | Error::Internal(_) => ErrorKind::Fatal,
            #[cfg(feature = "sqlx")]
            Error::Database(err) => classify_database_error(err),
            Error::Io(err) => match err.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused => ErrorKind::Transient,
                _ => ErrorKind::Fatal,
            },
        }
    }

    /// Only transient failures consume retry budget
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(feature = "sqlx")]
fn classify_database_error(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ErrorKind::Transient
        }
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("database is locked") || message.contains("busy") {
                ErrorKind::Transient
            } else if message.contains("UNIQUE constraint") || message.contains("constraint failed") {
                ErrorKind::Conflict
            } else {
                ErrorKind::Fatal
            }
        }
        _ => ErrorKind::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Transient("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(Error::Fatal("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::Fatal("boom".into()).is_retryable());
        assert!(!Error::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn test_io_timeout_is_transient() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_retryable());
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_pool_timeout_is_transient() {
        assert_eq!(Error::Database(sqlx::Error::PoolTimedOut).kind(), ErrorKind::Transient);
        assert_eq!(Error::Database(sqlx::Error::RowNotFound).kind(), ErrorKind::NotFound);
    }
}
