//! Base64 encoding used for every binary field on the wire.
//!
//! URL-safe alphabet, no padding on encode, no line wrapping. Decoding
//! accepts input with or without padding.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

const WIRE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes for transit.
pub fn encode(data: impl AsRef<[u8]>) -> String {
    WIRE.encode(data)
}

/// Decode a transit string into bytes.
pub fn decode(data: impl AsRef<[u8]>) -> crate::Result<Vec<u8>> {
    Ok(WIRE.decode(data)?)
}
