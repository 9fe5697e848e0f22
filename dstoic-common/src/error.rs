//! Common error types for dstoic

use thiserror::Error;

/// Common result type for dstoic operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the dstoic crates
#[derive(Error, Debug)]
pub enum Error {
    /// Backing resource missing, unreachable or permission-denied
    #[error("Store unavailable ({resource}): {reason}")]
    StoreUnavailable { resource: String, reason: String },

    /// Backing resource readable but not in the expected shape
    #[error("Malformed state in {resource}: {reason}")]
    MalformedState { resource: String, reason: String },

    /// Record could not be relocated at write time
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn unavailable(resource: impl Into<String>, reason: impl ToString) -> Self {
        Error::StoreUnavailable {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(resource: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedState {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}
