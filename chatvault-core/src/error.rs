//! Error types for chatvault-core

use thiserror::Error;

/// Main error type for the chatvault-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound record is missing required identity fields
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// Storage could not be reached or a transaction failed.
    ///
    /// Raised at chat-batch granularity: the affected chat's batch is
    /// aborted, the rest of the run continues.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Record source error
    #[error("record source error: {0}")]
    Source(String),
}

/// Result type alias for chatvault-core
pub type Result<T> = std::result::Result<T, Error>;
