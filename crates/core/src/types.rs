//! Core types

use serde::{Deserialize, Serialize};

/// Length of the big-endian issue-time prefix carried by every challenge.
pub const CHALLENGE_TIMESTAMP_LEN: usize = 8;

/// Trust record for a paired peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    /// Peer-assigned identifier, unique per holder
    pub id: String,
    /// Human readable peer name
    pub name: String,
    /// Alias of this holder's signing key in the hardware key store
    pub own_key_alias: String,
    /// Peer public key (SPKI DER)
    pub peer_public_key: Vec<u8>,
    /// Pairing time (Unix epoch milliseconds)
    pub created_at: u64,
    /// Last successful signature for this peer (Unix epoch milliseconds)
    pub last_used: u64,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        own_key_alias: impl Into<String>,
        peer_public_key: Vec<u8>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id: id.into(),
            name: name.into(),
            own_key_alias: own_key_alias.into(),
            peer_public_key,
            created_at: now,
            last_used: now,
        }
    }
}

/// Local projection of one challenge observed on the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Challenge {
    /// Base64 encoding of the challenge bytes; also the relay key
    pub id: String,
    /// Issue time (Unix epoch milliseconds)
    pub timestamp: u64,
    /// Peer signature over the challenge, set once on first observation
    pub signature: Option<String>,
    /// Holder signature over the challenge
    pub response: Option<String>,
    /// When the outcome was recorded
    pub responded_at: Option<u64>,
    /// Whether signing was canceled
    pub canceled: bool,
    /// Owning device
    pub device_id: String,
}

impl Challenge {
    pub fn new(id: impl Into<String>, device_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            signature: None,
            response: None,
            responded_at: None,
            canceled: false,
            device_id: device_id.into(),
        }
    }

    /// True once a response or a cancellation has been recorded.
    pub fn is_finalized(&self) -> bool {
        self.response.is_some() || self.canceled
    }

    /// Issue time carried in the first eight bytes of the challenge.
    pub fn issued_at(challenge: &[u8]) -> Option<u64> {
        let prefix: [u8; CHALLENGE_TIMESTAMP_LEN] =
            challenge.get(..CHALLENGE_TIMESTAMP_LEN)?.try_into().ok()?;
        Some(u64::from_be_bytes(prefix))
    }
}

/// Get current timestamp in milliseconds.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
