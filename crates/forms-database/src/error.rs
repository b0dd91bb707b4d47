//! Database error types.

use std::time::Duration;
use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The store could not be reached. Nothing can proceed without it.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation did not settle before its deadline.
    #[error("Timed out after {after:?}: {sql}")]
    Timeout { sql: String, after: Duration },

    /// Malformed statement or constraint violation.
    #[error("Query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// A unit of work panicked or its commit failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// No further operation can succeed until the process reconnects.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DatabaseError::Connection(_))
    }

    /// Transient; the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Timeout { .. })
    }
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Convert a tokio_rusqlite::Error to DatabaseError.
pub(crate) fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Query(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        tokio_rusqlite::Error::Close((_, e)) => {
            DatabaseError::Connection(format!("Failed to close connection: {e}"))
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}
