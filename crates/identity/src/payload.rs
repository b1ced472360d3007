//! Pairing payload and pairing response wire formats.

use keyward_core::encoding;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::{IdentityError, IdentityResult};

/// Out-of-band pairing payload scanned from the peer.
///
/// JSON object with string fields `id`, `name`, `publicKey` (base64 SPKI DER)
/// and `wrappingKey` (base64 shared secret).
pub struct PairingPayload {
    pub id: String,
    pub name: String,
    /// Peer public key (SPKI DER)
    pub public_key: Vec<u8>,
    /// Shared secret keying the pairing proof
    pub wrapping_key: Zeroizing<Vec<u8>>,
}

/// Payload as it appears on the wire, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    id: String,
    name: String,
    public_key: String,
    wrapping_key: String,
}

impl PairingPayload {
    /// Parse and validate raw payload bytes.
    pub fn parse(bytes: &[u8]) -> IdentityResult<Self> {
        let wire: WirePayload = serde_json::from_slice(bytes)
            .map_err(|e| IdentityError::Validation(format!("malformed payload: {e}")))?;
        let wrapping_key = Zeroizing::new(wire.wrapping_key);

        non_empty("id", &wire.id)?;
        non_empty("name", &wire.name)?;
        let public_key = decode_field("publicKey", &wire.public_key)?;
        let wrapping_key = Zeroizing::new(decode_field("wrappingKey", &wrapping_key)?);

        keyward_crypto::parse_public_key(&public_key)
            .map_err(|e| IdentityError::Validation(format!("publicKey: {e}")))?;

        Ok(Self {
            id: wire.id,
            name: wire.name,
            public_key,
            wrapping_key,
        })
    }
}

impl fmt::Debug for PairingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingPayload")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("public_key", &keyward_crypto::key_fingerprint(&self.public_key))
            .field("wrapping_key", &"<redacted>")
            .finish()
    }
}

fn non_empty(name: &str, value: &str) -> IdentityResult<()> {
    if value.is_empty() {
        return Err(IdentityError::Validation(format!("{name} is empty")));
    }
    Ok(())
}

fn decode_field(name: &str, encoded: &str) -> IdentityResult<Vec<u8>> {
    non_empty(name, encoded)?;
    let bytes = encoding::decode(encoded)
        .map_err(|e| IdentityError::Validation(format!("{name}: {e}")))?;
    if bytes.is_empty() {
        return Err(IdentityError::Validation(format!("{name} decodes to nothing")));
    }
    Ok(bytes)
}

/// Answer sent back to the peer after a successful pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    /// Holder public key (base64 SPKI DER)
    pub public_key: String,
    /// HMAC-SHA-256 of the public key bytes under the wrapping secret (base64)
    pub signature: String,
}

impl PairingResponse {
    pub fn new(public_key_der: &[u8], proof: &[u8]) -> Self {
        Self {
            public_key: encoding::encode(public_key_der),
            signature: encoding::encode(proof),
        }
    }

    pub fn to_json(&self) -> IdentityResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn public_key_der(&self) -> IdentityResult<Vec<u8>> {
        Ok(encoding::decode(&self.public_key)?)
    }

    pub fn proof(&self) -> IdentityResult<Vec<u8>> {
        Ok(encoding::decode(&self.signature)?)
    }
}
