//! Error types for the bridge

use std::io;

use thiserror::Error;

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-2xx response from the Data Plane API
    #[error("Data Plane API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// Configuration version changed between read and write
    #[error("Configuration version conflict")]
    VersionConflict,

    /// Resource does not exist (non-fatal for deletes)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Existing backend cannot be adopted
    #[error("Backend {backend} uses incompatible balance algorithm {algorithm}")]
    IncompatibleBackend {
        /// Backend name
        backend: String,
        /// Algorithm found on the existing backend
        algorithm: String,
    },

    /// Frontend-rule transaction aborted
    #[error("Transaction {id} failed: {message}")]
    Transaction {
        /// Transaction id
        id: String,
        /// Failure detail
        message: String,
    },

    /// Transient event-stream failure (reconnect follows)
    #[error("Event stream error: {0}")]
    Stream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    Shutdown,
}

impl Error {
    /// Whether the error is a missing-resource response
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
