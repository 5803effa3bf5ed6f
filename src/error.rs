//! Error types for ObsiLock.

use thiserror::Error;

/// Common error type for ObsiLock operations.
#[derive(Error, Debug)]
pub enum ObsiLockError {
    /// Configuration error (fatal at startup).
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error.
    ///
    /// This is a generic database error that wraps errors from any database backend.
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage quota exceeded. No state has been mutated.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Ownership mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Decryption or authentication failure. No partial plaintext is ever returned.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Content key could not be unwrapped (wrong master key or corrupt envelope).
    #[error("key unwrap error: {0}")]
    KeyUnwrap(String),

    /// Token signature mismatch. Logged distinctly as an attack signal; the API
    /// layer must surface it to callers as a generic lookup failure.
    #[error("token signature mismatch")]
    Tamper,
}

// Conversion from sqlx errors
impl From<sqlx::Error> for ObsiLockError {
    fn from(e: sqlx::Error) -> Self {
        ObsiLockError::Database(e.to_string())
    }
}

/// Result type alias for ObsiLock operations.
pub type Result<T> = std::result::Result<T, ObsiLockError>;
