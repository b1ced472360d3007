//! Cryptographic primitives for Keyward.
//!
//! # Core Capabilities
//!
//! - **Challenge verification**: ECDSA P-256 / SHA-256 over DER signatures,
//!   peer keys carried as X.509 SubjectPublicKeyInfo DER
//! - **Pairing proof**: HMAC-SHA-256 over the holder's public key, keyed by
//!   the out-of-band wrapping secret
//! - **Hardware key store**: the `HardwareKeyStore` seam and a software
//!   implementation whose signing contexts require a presence check
//!
//! # Security Principles
//!
//! - Private keys never leave the key store
//! - Every challenge signature is verified before a prompt is shown
//! - Secrets are zeroized after use and never logged

pub mod error;
pub mod keystore;
pub mod proof;
pub mod signing;

pub use error::{CryptoError, CryptoResult};
pub use keystore::{HardwareKeyStore, KeyPolicy, SignatureContext, SoftwareKeyStore};
pub use proof::{compute_pairing_proof, verify_pairing_proof};
pub use signing::{key_fingerprint, parse_public_key, verify_signature};
