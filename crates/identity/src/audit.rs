//! Re-verification of stored trust material.

use keyward_core::{encoding, Challenge, Device, Store};
use keyward_crypto::{verify_signature, HardwareKeyStore};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::{IdentityError, IdentityResult};

/// Verification result for one stored challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeAudit {
    pub challenge_id: String,
    /// Peer signature verifies against the stored peer key
    pub signature_valid: bool,
    /// Holder response verifies against the holder key; `None` without a response
    pub response_valid: Option<bool>,
    pub canceled: bool,
}

impl ChallengeAudit {
    pub fn passed(&self) -> bool {
        self.signature_valid && self.response_valid != Some(false)
    }
}

/// Verification result for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAudit {
    pub device_id: String,
    /// The device's signing key is still present in the key store
    pub key_present: bool,
    pub challenges: Vec<ChallengeAudit>,
    pub trusted: bool,
}

/// Re-verify every challenge stored for `device_id`.
pub fn audit_device(
    store: &Store,
    keystore: &dyn HardwareKeyStore,
    device_id: &str,
) -> IdentityResult<DeviceAudit> {
    let device = store
        .load_device(device_id)?
        .ok_or_else(|| IdentityError::DeviceNotFound {
            device_id: device_id.to_string(),
        })?;

    let own_key = keystore.public_key(&device.own_key_alias).ok();
    let challenges: Vec<ChallengeAudit> = store
        .load_challenges(device_id)?
        .iter()
        .map(|challenge| audit_challenge(&device, own_key.as_deref(), challenge))
        .collect();

    let trusted = own_key.is_some() && challenges.iter().all(ChallengeAudit::passed);
    if trusted {
        info!(device_id = %device_id, challenges = challenges.len(), "Device audit passed");
    } else {
        warn!(
            device_id = %device_id,
            key_present = own_key.is_some(),
            failed = challenges.iter().filter(|c| !c.passed()).count(),
            "Device audit failed"
        );
    }

    Ok(DeviceAudit {
        device_id: device.id,
        key_present: own_key.is_some(),
        challenges,
        trusted,
    })
}

fn audit_challenge(device: &Device, own_key: Option<&[u8]>, challenge: &Challenge) -> ChallengeAudit {
    let message = encoding::decode(&challenge.id).ok();
    let verifies = |key: &[u8], encoded: &str| -> bool {
        let (Some(message), Ok(signature)) = (message.as_deref(), encoding::decode(encoded)) else {
            return false;
        };
        verify_signature(key, message, &signature).is_ok()
    };

    let signature_valid = challenge
        .signature
        .as_deref()
        .is_some_and(|signature| verifies(&device.peer_public_key, signature));
    let response_valid = challenge
        .response
        .as_deref()
        .map(|response| own_key.is_some_and(|key| verifies(key, response)));

    ChallengeAudit {
        challenge_id: challenge.id.clone(),
        signature_valid,
        response_valid,
        canceled: challenge.canceled,
    }
}

/// Mismatches between stored devices and key store entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Key store aliases no device refers to
    pub lone_keys: Vec<String>,
    /// Devices whose signing key is missing
    pub lone_devices: Vec<String>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.lone_keys.is_empty() && self.lone_devices.is_empty()
    }
}

/// Compare stored devices with key store entries. Nothing is deleted.
pub fn reconcile(store: &Store, keystore: &dyn HardwareKeyStore) -> IdentityResult<Reconciliation> {
    let devices = store.load_devices()?;
    let aliases: HashSet<String> = keystore.aliases()?.into_iter().collect();
    let referenced: HashSet<&str> = devices.iter().map(|d| d.own_key_alias.as_str()).collect();

    let mut report = Reconciliation {
        lone_keys: aliases
            .iter()
            .filter(|alias| !referenced.contains(alias.as_str()))
            .cloned()
            .collect(),
        lone_devices: devices
            .iter()
            .filter(|device| !aliases.contains(&device.own_key_alias))
            .map(|device| device.id.clone())
            .collect(),
    };
    report.lone_keys.sort();

    if !report.is_consistent() {
        warn!(
            lone_keys = report.lone_keys.len(),
            lone_devices = report.lone_devices.len(),
            "Key store and device records disagree"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_crypto::{KeyPolicy, SignatureContext, SoftwareKeyStore};

    struct Fixture {
        store: Store,
        keystore: SoftwareKeyStore,
        peer: SoftwareKeyStore,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let keystore = SoftwareKeyStore::new();
        let peer = SoftwareKeyStore::new();

        let peer_key = peer
            .generate_key_pair("peer", KeyPolicy::presence_gated())
            .unwrap();
        keystore
            .generate_key_pair("own", KeyPolicy::presence_gated())
            .unwrap();
        store
            .insert_device(&Device::new("dev-1", "Desktop", "own", peer_key))
            .unwrap();

        Fixture {
            store,
            keystore,
            peer,
        }
    }

    fn sign(keystore: &SoftwareKeyStore, alias: &str, message: &[u8]) -> String {
        let mut ctx = keystore.signature_context(alias).unwrap();
        ctx.unlock();
        encoding::encode(ctx.sign(message).unwrap())
    }

    fn add_challenge(f: &Fixture, nonce: u8, respond: bool) -> String {
        let message = [nonce; 16];
        let id = encoding::encode(message);
        let mut challenge = Challenge::new(&id, "dev-1", 0);
        challenge.signature = Some(sign(&f.peer, "peer", &message));
        if respond {
            challenge.response = Some(sign(&f.keystore, "own", &message));
        }
        f.store.save_challenge(&challenge).unwrap();
        id
    }

    #[test]
    fn test_audit_passes_for_genuine_history() {
        let f = fixture();
        add_challenge(&f, 1, true);
        add_challenge(&f, 2, false);

        let audit = audit_device(&f.store, &f.keystore, "dev-1").unwrap();
        assert!(audit.trusted);
        assert!(audit.key_present);
        assert_eq!(audit.challenges.len(), 2);
    }

    #[test]
    fn test_audit_flags_forged_response() {
        let f = fixture();
        let id = add_challenge(&f, 1, false);
        let mut challenge = f.store.load_challenge(&id).unwrap().unwrap();
        challenge.response = Some(sign(&f.peer, "peer", &[1u8; 16]));
        f.store.save_challenge(&challenge).unwrap();

        let audit = audit_device(&f.store, &f.keystore, "dev-1").unwrap();
        assert!(!audit.trusted);
        assert!(audit.challenges[0].signature_valid);
        assert_eq!(audit.challenges[0].response_valid, Some(false));
    }

    #[test]
    fn test_audit_fails_without_own_key() {
        let f = fixture();
        f.keystore.delete_entry("own").unwrap();

        let audit = audit_device(&f.store, &f.keystore, "dev-1").unwrap();
        assert!(!audit.key_present);
        assert!(!audit.trusted);
    }

    #[test]
    fn test_audit_unknown_device() {
        let f = fixture();
        assert!(matches!(
            audit_device(&f.store, &f.keystore, "nope"),
            Err(IdentityError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_reconcile_reports_lone_keys_and_devices() {
        let f = fixture();
        assert!(reconcile(&f.store, &f.keystore).unwrap().is_consistent());

        f.keystore
            .generate_key_pair("stray", KeyPolicy::presence_gated())
            .unwrap();
        f.store
            .insert_device(&Device::new("dev-2", "Laptop", "gone", vec![1, 2, 3]))
            .unwrap();

        let report = reconcile(&f.store, &f.keystore).unwrap();
        assert_eq!(report.lone_keys, vec!["stray".to_string()]);
        assert_eq!(report.lone_devices, vec!["dev-2".to_string()]);
        assert!(f.keystore.contains_alias("stray").unwrap());
    }
}
