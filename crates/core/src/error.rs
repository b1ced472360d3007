//! Core error types

use thiserror::Error;

/// Core error type for Keyward
#[derive(Debug, Error)]
pub enum Error {
    /// Local store failure
    #[cfg(feature = "sqlite")]
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A record referenced by id does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Base64 payload could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
