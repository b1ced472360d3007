//! Error types for pairing and device trust operations.

use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Pairing payload rejected
    #[error("Invalid pairing payload: {0}")]
    Validation(String),

    /// A device with this id is already paired
    #[error("Device already paired: {device_id}")]
    DevicePaired { device_id: String },

    /// Device not found
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    /// Core errors
    #[error("Core error: {0}")]
    Core(#[from] keyward_core::Error),

    /// Cryptographic errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] keyward_crypto::CryptoError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
