//! Device pairing and trust records for Keyward.
//!
//! Pairing turns an out-of-band payload (scanned from the peer's QR code)
//! into a trusted [`Device`](keyward_core::Device): the holder creates a
//! presence-gated signing key, proves the new public key to the peer with an
//! HMAC keyed by the shared wrapping secret, and stores the peer's public
//! key for challenge verification.
//!
//! # Security Model
//!
//! - A rejected payload creates no key and persists nothing
//! - Every holder key requires user presence for each signature
//! - The wrapping secret is zeroized once the proof is computed

pub mod audit;
pub mod error;
pub mod payload;
pub mod registry;

pub use audit::{audit_device, reconcile, ChallengeAudit, DeviceAudit, Reconciliation};
pub use error::{IdentityError, IdentityResult};
pub use payload::{PairingPayload, PairingResponse};
pub use registry::{DeviceRegistry, Paired};
