//! Hardware-backed key store seam.
//!
//! The holder's signing keys live in a platform key store (secure element,
//! TEE, OS keychain). The store generates P-256 key pairs under an alias,
//! exports only public keys, and hands out signature contexts that refuse to
//! sign until the platform has confirmed user presence for that context.
//!
//! `SoftwareKeyStore` keeps keys in process memory and enforces the same
//! presence gate. It backs tests and platforms without secure hardware.

use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::EncodePublicKey;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{CryptoError, CryptoResult};

/// Usage restrictions attached to a key at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Every private-key operation requires a fresh presence check.
    pub user_presence_required: bool,
}

impl KeyPolicy {
    /// Policy used for all pairing keys.
    pub fn presence_gated() -> Self {
        Self {
            user_presence_required: true,
        }
    }
}

/// Platform key store holding the holder's non-exportable signing keys.
pub trait HardwareKeyStore: Send + Sync {
    /// Whether an entry exists under `alias`.
    fn contains_alias(&self, alias: &str) -> CryptoResult<bool>;

    /// Generate a P-256 key pair under `alias` and return its SPKI DER public key.
    fn generate_key_pair(&self, alias: &str, policy: KeyPolicy) -> CryptoResult<Vec<u8>>;

    /// SPKI DER public key of the entry under `alias`.
    fn public_key(&self, alias: &str) -> CryptoResult<Vec<u8>>;

    /// All aliases currently present.
    fn aliases(&self) -> CryptoResult<Vec<String>>;

    /// Remove the entry under `alias`. Absent entries are not an error.
    fn delete_entry(&self, alias: &str) -> CryptoResult<()>;

    /// Load the private key under `alias` into a fresh signature context.
    fn signature_context(&self, alias: &str) -> CryptoResult<Box<dyn SignatureContext>>;
}

/// A private-key handle ready to sign once presence has been confirmed.
pub trait SignatureContext: Send {
    fn alias(&self) -> &str;

    /// Mark the context as authorized by a successful presence check.
    fn unlock(&mut self);

    /// Sign `message` (ECDSA P-256 / SHA-256, DER encoded).
    fn sign(&mut self, message: &[u8]) -> CryptoResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
struct SoftwareKeyRecord {
    signing_key: SigningKey,
    policy: KeyPolicy,
}

/// In-memory key store enforcing the presence policy of each key.
#[derive(Debug, Default)]
pub struct SoftwareKeyStore {
    keys: Mutex<HashMap<String, SoftwareKeyRecord>>,
}

impl SoftwareKeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn keys(&self) -> MutexGuard<'_, HashMap<String, SoftwareKeyRecord>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, alias: &str) -> CryptoResult<SoftwareKeyRecord> {
        self.keys()
            .get(alias)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound {
                alias: alias.to_string(),
            })
    }
}

impl HardwareKeyStore for SoftwareKeyStore {
    fn contains_alias(&self, alias: &str) -> CryptoResult<bool> {
        Ok(self.keys().contains_key(alias))
    }

    fn generate_key_pair(&self, alias: &str, policy: KeyPolicy) -> CryptoResult<Vec<u8>> {
        let mut keys = self.keys();
        if keys.contains_key(alias) {
            return Err(CryptoError::AliasExists {
                alias: alias.to_string(),
            });
        }

        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = encode_public_key(&signing_key)?;
        keys.insert(
            alias.to_string(),
            SoftwareKeyRecord {
                signing_key,
                policy,
            },
        );

        info!(
            alias = alias,
            presence_required = policy.user_presence_required,
            "Generated signing key"
        );
        Ok(public_key)
    }

    fn public_key(&self, alias: &str) -> CryptoResult<Vec<u8>> {
        encode_public_key(&self.record(alias)?.signing_key)
    }

    fn aliases(&self) -> CryptoResult<Vec<String>> {
        let mut aliases: Vec<String> = self.keys().keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    }

    fn delete_entry(&self, alias: &str) -> CryptoResult<()> {
        if self.keys().remove(alias).is_some() {
            debug!(alias = alias, "Deleted signing key");
        }
        Ok(())
    }

    fn signature_context(&self, alias: &str) -> CryptoResult<Box<dyn SignatureContext>> {
        let record = self.record(alias)?;
        Ok(Box::new(SoftwareSignatureContext {
            alias: alias.to_string(),
            signing_key: record.signing_key,
            presence_required: record.policy.user_presence_required,
            unlocked: false,
        }))
    }
}

struct SoftwareSignatureContext {
    alias: String,
    signing_key: SigningKey,
    presence_required: bool,
    unlocked: bool,
}

impl SignatureContext for SoftwareSignatureContext {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn unlock(&mut self) {
        self.unlocked = true;
    }

    fn sign(&mut self, message: &[u8]) -> CryptoResult<Vec<u8>> {
        if self.presence_required && !self.unlocked {
            return Err(CryptoError::PresenceRequired {
                alias: self.alias.clone(),
            });
        }
        // One presence check authorizes one operation.
        self.unlocked = false;

        let signature: Signature = self.signing_key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

fn encode_public_key(signing_key: &SigningKey) -> CryptoResult<Vec<u8>> {
    signing_key
        .verifying_key()
        .to_public_key_der()
        .map(|document| document.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyStore(format!("public key encoding failed: {e}")))
}
