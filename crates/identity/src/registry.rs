//! Device registry: pairing and removal of trusted peers.

use keyward_core::{Device, Store};
use keyward_crypto::{compute_pairing_proof, CryptoError, HardwareKeyStore, KeyPolicy};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::payload::{PairingPayload, PairingResponse};
use crate::{IdentityError, IdentityResult};

/// Outcome of a successful pairing.
#[derive(Debug, Clone)]
pub struct Paired {
    pub device: Device,
    /// To be published to the peer
    pub response: PairingResponse,
}

/// Establishes and removes trusted devices.
pub struct DeviceRegistry {
    store: Arc<Store>,
    keystore: Arc<dyn HardwareKeyStore>,
    watch: Option<mpsc::UnboundedSender<String>>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<Store>, keystore: Arc<dyn HardwareKeyStore>) -> Self {
        Self {
            store,
            keystore,
            watch: None,
        }
    }

    /// Announce every newly paired device id on `watch`.
    pub fn with_watch_channel(mut self, watch: mpsc::UnboundedSender<String>) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Pair with the peer described by raw payload bytes.
    ///
    /// On any error no key pair remains in the key store and no device is
    /// stored.
    pub fn pair(&self, payload: &[u8]) -> IdentityResult<Paired> {
        let payload = PairingPayload::parse(payload)?;
        if self.store.load_device(&payload.id)?.is_some() {
            warn!(device_id = %payload.id, "Pairing rejected, device already paired");
            return Err(IdentityError::DevicePaired {
                device_id: payload.id,
            });
        }

        let (alias, public_key) = self.create_key()?;
        match self.register(&payload, &alias, &public_key) {
            Ok(paired) => {
                info!(
                    device_id = %paired.device.id,
                    device_name = %paired.device.name,
                    alias = %alias,
                    peer_key = %keyward_crypto::key_fingerprint(&paired.device.peer_public_key),
                    "Device paired"
                );
                self.announce(&paired.device.id);
                Ok(paired)
            }
            Err(e) => {
                if let Err(cleanup) = self.keystore.delete_entry(&alias) {
                    error!(alias = %alias, error = %cleanup, "Failed to remove key of rejected pairing");
                }
                Err(e)
            }
        }
    }

    fn create_key(&self) -> IdentityResult<(String, Vec<u8>)> {
        loop {
            let alias = Uuid::new_v4().to_string();
            if self.keystore.contains_alias(&alias)? {
                debug!(alias = %alias, "Key alias taken, generating another");
                continue;
            }
            match self
                .keystore
                .generate_key_pair(&alias, KeyPolicy::presence_gated())
            {
                Ok(public_key) => return Ok((alias, public_key)),
                Err(CryptoError::AliasExists { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn register(
        &self,
        payload: &PairingPayload,
        alias: &str,
        public_key: &[u8],
    ) -> IdentityResult<Paired> {
        let proof = compute_pairing_proof(&payload.wrapping_key, public_key)?;
        let device = Device::new(
            payload.id.clone(),
            payload.name.clone(),
            alias,
            payload.public_key.clone(),
        );

        if let Err(e) = self.store.insert_device(&device) {
            // Lost a race against a concurrent pairing of the same id.
            if self.store.load_device(&device.id)?.is_some() {
                return Err(IdentityError::DevicePaired {
                    device_id: device.id,
                });
            }
            return Err(e.into());
        }

        Ok(Paired {
            device,
            response: PairingResponse::new(public_key, &proof),
        })
    }

    fn announce(&self, device_id: &str) {
        if let Some(watch) = &self.watch {
            if watch.send(device_id.to_string()).is_err() {
                warn!(device_id = %device_id, "No stream supervisor listening for new devices");
            }
        }
    }

    pub fn device(&self, device_id: &str) -> IdentityResult<Device> {
        self.store
            .load_device(device_id)?
            .ok_or_else(|| IdentityError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    pub fn devices(&self) -> IdentityResult<Vec<Device>> {
        Ok(self.store.load_devices()?)
    }

    /// Remove a device, its challenges and its signing key.
    pub fn forget(&self, device_id: &str) -> IdentityResult<Device> {
        let device = self.device(device_id)?;
        self.store.delete_device(device_id)?;
        self.keystore.delete_entry(&device.own_key_alias)?;
        info!(device_id = %device_id, alias = %device.own_key_alias, "Device forgotten");
        Ok(device)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn keystore(&self) -> &Arc<dyn HardwareKeyStore> {
        &self.keystore
    }
}
