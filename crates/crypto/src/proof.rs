//! Pairing proof.
//!
//! The holder proves that the public key it returns during pairing was
//! produced by the party that scanned the out-of-band payload: it MACs the
//! key's SPKI encoding with the payload's wrapping secret. The peer holds the
//! same secret and recomputes the MAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA-256 of `public_key_der` keyed by `wrapping_key`.
pub fn compute_pairing_proof(wrapping_key: &[u8], public_key_der: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac = mac_for(wrapping_key)?;
    mac.update(public_key_der);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time check of a pairing proof.
pub fn verify_pairing_proof(
    wrapping_key: &[u8],
    public_key_der: &[u8],
    proof: &[u8],
) -> CryptoResult<()> {
    let mut mac = mac_for(wrapping_key)?;
    mac.update(public_key_der);
    mac.verify_slice(proof)
        .map_err(|_| CryptoError::VerificationFailed)
}

fn mac_for(wrapping_key: &[u8]) -> CryptoResult<HmacSha256> {
    if wrapping_key.is_empty() {
        return Err(CryptoError::InvalidMacKey("wrapping key is empty".to_string()));
    }
    <HmacSha256 as Mac>::new_from_slice(wrapping_key)
        .map_err(|e| CryptoError::InvalidMacKey(e.to_string()))
}
