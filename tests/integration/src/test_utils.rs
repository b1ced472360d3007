//! Test utilities for end-to-end holder tests

use async_trait::async_trait;
use keyward_core::{current_timestamp, encoding, logging, Config, Store};
use keyward_crypto::{HardwareKeyStore, KeyPolicy, SignatureContext, SoftwareKeyStore};
use keyward_identity::{DeviceRegistry, IdentityResult, Paired};
use keyward_presence::{
    CancellationSignal, GateService, PresencePrompt, PromptEvent, PromptRequest, SigningGate,
    SigningMediator,
};
use keyward_stream::{InMemoryRemoteStore, StreamContext, StreamSupervisor};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// How the simulated user answers presence prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserBehaviour {
    Approve,
    Deny,
    /// Leave the prompt open until it is cancelled
    Ignore,
    /// The platform dismisses the first prompt on its own, then the user approves
    GlitchThenApprove,
}

/// Presence prompt driven by a fixed [`UserBehaviour`].
pub struct SimulatedUser {
    behaviour: UserBehaviour,
    prompts: AtomicUsize,
}

impl SimulatedUser {
    pub fn new(behaviour: UserBehaviour) -> Self {
        Self {
            behaviour,
            prompts: AtomicUsize::new(0),
        }
    }

    /// Number of prompts shown so far
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresencePrompt for SimulatedUser {
    async fn authenticate(&self, _: &PromptRequest, signal: CancellationSignal) -> PromptEvent {
        let shown = self.prompts.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            UserBehaviour::Approve => PromptEvent::Authenticated,
            UserBehaviour::Deny => PromptEvent::NegativeAction,
            UserBehaviour::GlitchThenApprove if shown == 0 => {
                signal.cancel();
                PromptEvent::Error {
                    code: 5,
                    message: "Fingerprint operation canceled".to_string(),
                }
            }
            UserBehaviour::GlitchThenApprove => PromptEvent::Authenticated,
            UserBehaviour::Ignore => {
                signal.cancelled().await;
                PromptEvent::Error {
                    code: 5,
                    message: "Fingerprint operation canceled".to_string(),
                }
            }
        }
    }
}

/// The remote peer: owns its signing key and the shared wrapping secret.
pub struct TestPeer {
    pub id: String,
    pub public_key: Vec<u8>,
    pub wrapping_key: Vec<u8>,
    keys: SoftwareKeyStore,
}

impl TestPeer {
    pub fn new(id: &str) -> Self {
        let keys = SoftwareKeyStore::new();
        let public_key = keys
            .generate_key_pair("peer", KeyPolicy { user_presence_required: false })
            .unwrap();
        Self {
            id: id.to_string(),
            public_key,
            wrapping_key: id.bytes().cycle().take(32).collect(),
            keys,
        }
    }

    /// QR payload announcing this peer
    pub fn qr_payload(&self) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": self.id,
            "name": format!("Workstation {}", self.id),
            "publicKey": encoding::encode(&self.public_key),
            "wrappingKey": encoding::encode(&self.wrapping_key),
        }))
        .unwrap()
    }

    /// Challenge bytes issued `offset_ms` from now, and the relay key for them.
    pub fn challenge(&self, offset_ms: i64, nonce: u8) -> (Vec<u8>, String) {
        let issued = (current_timestamp() as i64 + offset_ms) as u64;
        let mut bytes = issued.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[nonce; 32]);
        let key = encoding::encode(&bytes);
        (bytes, key)
    }

    pub fn sign(&self, message: &[u8]) -> String {
        let mut ctx = self.keys.signature_context("peer").unwrap();
        encoding::encode(ctx.sign(message).unwrap())
    }

    pub fn namespace(&self) -> String {
        format!("c/{}", self.id)
    }
}

/// A fully wired holder: registry, gate service and stream supervisor.
pub struct TestHolder {
    pub config: Config,
    pub store: Arc<Store>,
    pub keystore: Arc<SoftwareKeyStore>,
    pub remote: Arc<InMemoryRemoteStore>,
    pub registry: DeviceRegistry,
    pub supervisor: Arc<StreamSupervisor>,
    pub user: Arc<SimulatedUser>,
    _gate: JoinHandle<()>,
    _watcher: JoinHandle<()>,
}

impl TestHolder {
    pub async fn start(behaviour: UserBehaviour) -> Self {
        let config = Config::default_config();
        let _ = logging::init(&config.logging);

        let store = Arc::new(Store::open_in_memory().unwrap());
        let keystore = Arc::new(SoftwareKeyStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let user = Arc::new(SimulatedUser::new(behaviour));

        let mediator = SigningMediator::new();
        let gate = SigningGate::new(
            keystore.clone(),
            user.clone(),
            config.policy.max_prompt_retries,
        );
        let (inbox, gate_task) = GateService::spawn(Arc::new(gate), mediator.clone());

        let supervisor = Arc::new(StreamSupervisor::new(StreamContext {
            store: store.clone(),
            remote: remote.clone(),
            mediator,
            gate: inbox,
            policy: config.policy.clone(),
            layout: config.remote.clone(),
        }));
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let watcher = supervisor.watch_registrations(watch_rx);
        supervisor.start_all().await.unwrap();

        let registry = DeviceRegistry::new(store.clone(), keystore.clone()).with_watch_channel(watch_tx);

        Self {
            config,
            store,
            keystore,
            remote,
            registry,
            supervisor,
            user,
            _gate: gate_task,
            _watcher: watcher,
        }
    }

    /// Pair with `peer`, publish the pairing response and wait until watched.
    pub async fn pair(&self, peer: &TestPeer) -> IdentityResult<Paired> {
        let paired = self.registry.pair(&peer.qr_payload())?;
        self.supervisor
            .send_info(&paired.device.id, &paired.response)
            .await
            .unwrap();
        settle().await;
        Ok(paired)
    }

    /// Publish a correctly signed challenge issued `offset_ms` from now.
    pub async fn relay_challenge(&self, peer: &TestPeer, offset_ms: i64, nonce: u8) -> String {
        let (bytes, key) = peer.challenge(offset_ms, nonce);
        self.relay(peer, &key, &peer.sign(&bytes)).await;
        key
    }

    /// Write a raw value under the peer's namespace, as the peer would.
    pub async fn relay(&self, peer: &TestPeer, key: &str, value: &str) {
        use keyward_stream::RemoteEventStore;
        self.remote
            .set_value(&peer.namespace(), key, value)
            .await
            .unwrap();
    }

    pub fn remote_value(&self, peer: &TestPeer, key: &str) -> Option<String> {
        self.remote.children(&peer.namespace()).get(key).cloned()
    }
}

/// Let every task run to quiescence (100 ms of runtime time).
pub async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
