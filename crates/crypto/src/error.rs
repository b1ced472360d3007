//! Error types for Keyward cryptographic operations.

use thiserror::Error;

/// Errors that can occur in key handling and signature operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key could not be parsed
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signature could not be parsed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// Signature parsed but does not verify
    #[error("Signature verification failed")]
    VerificationFailed,

    /// MAC key rejected
    #[error("Invalid MAC key: {0}")]
    InvalidMacKey(String),

    /// Alias already taken in the key store
    #[error("Key alias already exists: {alias}")]
    AliasExists { alias: String },

    /// Alias unknown to the key store
    #[error("Key not found: {alias}")]
    KeyNotFound { alias: String },

    /// The key requires a passed presence check before use
    #[error("User presence required for key: {alias}")]
    PresenceRequired { alias: String },

    /// Backend failure
    #[error("Key store error: {0}")]
    KeyStore(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
