//! Error types for volley.

use thiserror::Error;

/// Result type alias using volley's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for volley operations.
///
/// Per-request failures are not represented here; they travel as
/// [`RequestError`](crate::RequestError) inside each task's outcome. This type
/// covers everything around a batch: configuration, credentials, and the
/// aggregate batch verdict.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential provider failed and no credential is available
    #[error("Credential error: {0}")]
    Credential(String),

    /// HTTP/network request failed outside of a task
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One or more tasks in a batch ended in a terminal failure
    #[error("Batch failed: {failed} of {total} tasks did not succeed")]
    BatchFailed { failed: usize, total: usize },

    /// The batch was cancelled before every task reached an outcome
    #[error("Batch cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
