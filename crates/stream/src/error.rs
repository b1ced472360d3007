//! Error types for Keyward stream operations.

use thiserror::Error;

/// Errors that can occur in stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Remote event store unreachable or rejected the operation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Device not found
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    /// Core errors
    #[error("Core error: {0}")]
    Core(#[from] keyward_core::Error),

    /// Pairing response errors
    #[error("Identity error: {0}")]
    Identity(#[from] keyward_identity::IdentityError),

    /// Signing request could not be dispatched
    #[error("Mediator error: {0}")]
    Mediator(#[from] keyward_bus::MediatorError),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
