//! Challenge signature verification.
//!
//! Peers publish ECDSA P-256 signatures with a SHA-256 digest, DER encoded,
//! and their public keys as X.509 SubjectPublicKeyInfo DER documents.

use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};

use crate::{CryptoError, CryptoResult};

/// Parse a peer public key from its SPKI DER encoding.
pub fn parse_public_key(spki_der: &[u8]) -> CryptoResult<VerifyingKey> {
    VerifyingKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verify a DER-encoded ECDSA P-256/SHA-256 signature over `message`.
pub fn verify_signature(spki_der: &[u8], message: &[u8], signature_der: &[u8]) -> CryptoResult<()> {
    let verifying_key = parse_public_key(spki_der)?;
    let signature = Signature::from_der(signature_der)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Short, log-safe identifier for a public key.
pub fn key_fingerprint(spki_der: &[u8]) -> String {
    let digest = Sha256::digest(spki_der);
    hex::encode(&digest[..8])
}
