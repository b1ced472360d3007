//! Challenge Stream Processor
//!
//! Drives one device's challenges from first observation on the remote
//! store to a recorded outcome:
//!
//! 1. *added*: claim the challenge (first observation wins) and arm its
//!    expiry timer, purge it when stale or future-dated, otherwise verify the
//!    peer signature and request a presence-gated signature.
//! 2. signing outcome: publish the response, or record the cancellation and
//!    remove the remote entry.
//! 3. *changed*: refresh only.
//! 4. *removed*: cancel an in-flight signing request for that challenge.
//! 5. expiry: remove the entry unless it holds the recorded response.
//!
//! Relay writes that fail are kept and retried on every later event.

use keyward_bus::{Correlated, PendingRequest};
use keyward_core::{current_timestamp, encoding, Challenge, Device, PolicyConfig, RemoteConfig, Store};
use keyward_crypto::verify_signature;
use keyward_presence::{SignRequest, SignResponse, SigningMediator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::remote::{ChildEvent, ChildEvents, RemoteEventStore};
use crate::StreamResult;

/// Shared collaborators of every processor.
#[derive(Clone)]
pub struct StreamContext {
    pub store: Arc<Store>,
    pub remote: Arc<dyn RemoteEventStore>,
    pub mediator: SigningMediator,
    /// Inbox of the signing gate service
    pub gate: mpsc::UnboundedSender<Correlated<SignRequest>>,
    pub policy: PolicyConfig,
    pub layout: RemoteConfig,
}

/// Age class of a challenge relative to the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Future,
}

/// Classify a challenge issued at `timestamp` as observed at `now` (ms).
pub fn classify_age(policy: &PolicyConfig, now: u64, timestamp: u64) -> Freshness {
    let age = now as i128 - timestamp as i128;
    if age > policy.stale_after_ms as i128 {
        Freshness::Stale
    } else if age < -(policy.future_skew_ms as i128) {
        Freshness::Future
    } else {
        Freshness::Fresh
    }
}

/// What the *added* handler did with a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Signature already recorded; redelivery ignored
    Duplicate,
    /// Purged, too old
    Stale,
    /// Purged, issued in the future
    Future,
    /// Peer signature did not verify; dropped
    Unverified,
    /// Signing requested
    Requested,
}

#[derive(Debug)]
struct SigningOutcome {
    challenge_id: String,
    signature: Option<Vec<u8>>,
}

/// Relay write still owed for a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RelayWrite {
    Publish(String),
    Remove,
}

type CancelHandles = Arc<Mutex<HashMap<String, PendingRequest<SignResponse>>>>;

/// Processes the challenges of one device.
pub struct ChallengeProcessor {
    device: Device,
    namespace: String,
    ctx: StreamContext,
    pending: CancelHandles,
    outcomes: mpsc::UnboundedSender<SigningOutcome>,
    expiries: mpsc::UnboundedSender<String>,
    unsettled: HashMap<String, RelayWrite>,
}

impl ChallengeProcessor {
    /// Subscribe to the device's namespace and run the processor on its own task.
    pub async fn spawn(device: Device, ctx: StreamContext) -> StreamResult<JoinHandle<()>> {
        let namespace = ctx.layout.challenge_namespace(&device.id);
        let events = ctx.remote.subscribe(&namespace).await?;
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let (expiries, expiries_rx) = mpsc::unbounded_channel();

        info!(device_id = %device.id, namespace = %namespace, "Watching device challenges");
        let processor = Self {
            device,
            namespace,
            ctx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            outcomes,
            expiries,
            unsettled: HashMap::new(),
        };
        Ok(tokio::spawn(processor.run(events, outcomes_rx, expiries_rx)))
    }

    async fn run(
        mut self,
        mut events: ChildEvents,
        mut outcomes: mpsc::UnboundedReceiver<SigningOutcome>,
        mut expiries: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!(device_id = %self.device.id, "Challenge subscription closed");
                        break;
                    }
                },
                Some(outcome) = outcomes.recv() => {
                    self.retry_unsettled().await;
                    let challenge_id = outcome.challenge_id.clone();
                    if let Err(e) = self.on_outcome(outcome).await {
                        error!(device_id = %self.device.id, challenge = %challenge_id, error = %e, "Failed to finalize challenge");
                    }
                }
                Some(key) = expiries.recv() => {
                    self.retry_unsettled().await;
                    if let Err(e) = self.on_expired(&key).await {
                        warn!(device_id = %self.device.id, challenge = %key, error = %e, "Failed to remove expired challenge");
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ChildEvent) {
        if let ChildEvent::Removed { key, .. } = &event {
            self.unsettled.remove(key);
        }
        self.retry_unsettled().await;

        match event {
            ChildEvent::Added { key, value } => match self.on_added(&key, &value).await {
                Ok(disposition) => {
                    debug!(device_id = %self.device.id, challenge = %key, disposition = ?disposition, "Challenge observed")
                }
                Err(e) => {
                    error!(device_id = %self.device.id, challenge = %key, error = %e, "Failed to process challenge")
                }
            },
            ChildEvent::Changed { key, .. } => self.on_changed(&key),
            ChildEvent::Removed { key, .. } => self.on_removed(&key),
            ChildEvent::Error(message) => {
                warn!(device_id = %self.device.id, error = %message, "Remote subscription error");
            }
        }
    }

    async fn on_added(&mut self, key: &str, value: &str) -> StreamResult<ChallengeDisposition> {
        let now = current_timestamp();
        let message = encoding::decode(key).ok();
        let timestamp = message
            .as_deref()
            .and_then(Challenge::issued_at)
            .unwrap_or(now);

        let Some(challenge) = self
            .ctx
            .store
            .claim_challenge(key, &self.device.id, timestamp, value)?
        else {
            return Ok(ChallengeDisposition::Duplicate);
        };
        self.schedule_expiry(key);

        match classify_age(&self.ctx.policy, now, challenge.timestamp) {
            Freshness::Stale => {
                info!(device_id = %self.device.id, challenge = %key, age_ms = now.saturating_sub(timestamp), "Purging stale challenge");
                self.write_relay(key, RelayWrite::Remove).await?;
                return Ok(ChallengeDisposition::Stale);
            }
            Freshness::Future => {
                info!(device_id = %self.device.id, challenge = %key, ahead_ms = timestamp.saturating_sub(now), "Purging future-dated challenge");
                self.write_relay(key, RelayWrite::Remove).await?;
                return Ok(ChallengeDisposition::Future);
            }
            Freshness::Fresh => {}
        }

        let Some(message) = message.filter(|m| self.verify(m, value)) else {
            warn!(device_id = %self.device.id, challenge = %key, "Challenge signature rejected");
            return Ok(ChallengeDisposition::Unverified);
        };

        let request = SignRequest {
            device_id: self.device.id.clone(),
            device_name: self.device.name.clone(),
            key_alias: self.device.own_key_alias.clone(),
            message,
        };
        let outcomes = self.outcomes.clone();
        let challenge_id = key.to_string();
        let pending = self.ctx.mediator.request(request, &self.ctx.gate, move |response| {
            let _ = outcomes.send(SigningOutcome {
                challenge_id,
                signature: response.signature,
            });
        })?;
        self.cancel_handles().insert(key.to_string(), pending);

        info!(device_id = %self.device.id, challenge = %key, "Signature requested");
        Ok(ChallengeDisposition::Requested)
    }

    fn verify(&self, message: &[u8], signature: &str) -> bool {
        encoding::decode(signature)
            .ok()
            .is_some_and(|signature| verify_signature(&self.device.peer_public_key, message, &signature).is_ok())
    }

    fn schedule_expiry(&self, key: &str) {
        let expiries = self.expiries.clone();
        let key = key.to_string();
        let delay = self.ctx.policy.expire_after();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expiries.send(key);
        });
    }

    /// Remove an expired entry unless the relay already holds our response.
    async fn on_expired(&mut self, key: &str) -> StreamResult<()> {
        let answered = self.ctx.store.load_challenge(key)?.and_then(|c| c.response);
        if let Some(response) = answered {
            match self.ctx.remote.get_value(&self.namespace, key).await {
                Ok(Some(value)) if value == response => {
                    debug!(challenge = %key, "Expired challenge holds response, kept");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!(challenge = %key, error = %e, "Expiry lookup failed, removing anyway"),
            }
        }
        self.write_relay(key, RelayWrite::Remove).await?;
        info!(device_id = %self.device.id, challenge = %key, "Expired challenge removed");
        Ok(())
    }

    /// Apply `write` to the relay, keeping it for retry when it fails.
    async fn write_relay(&mut self, key: &str, write: RelayWrite) -> StreamResult<()> {
        let result = match &write {
            RelayWrite::Publish(response) => self.ctx.remote.set_value(&self.namespace, key, response).await,
            RelayWrite::Remove => self.ctx.remote.remove_value(&self.namespace, key).await,
        };
        match result {
            Ok(()) => {
                self.unsettled.remove(key);
                Ok(())
            }
            Err(e) => {
                self.unsettled.insert(key.to_string(), write);
                Err(e)
            }
        }
    }

    async fn retry_unsettled(&mut self) {
        if self.unsettled.is_empty() {
            return;
        }
        let owed: Vec<(String, RelayWrite)> = self.unsettled.drain().collect();
        for (key, write) in owed {
            match self.write_relay(&key, write).await {
                Ok(()) => info!(device_id = %self.device.id, challenge = %key, "Relay write retried"),
                Err(e) => debug!(challenge = %key, error = %e, "Relay write still failing"),
            }
        }
    }

    async fn on_outcome(&mut self, outcome: SigningOutcome) -> StreamResult<()> {
        self.cancel_handles().remove(&outcome.challenge_id);
        let id = outcome.challenge_id.as_str();
        let now = current_timestamp();

        match outcome.signature {
            Some(signature) => {
                let response = encoding::encode(signature);
                if !self.ctx.store.record_response(id, &response, now)? {
                    debug!(challenge = %id, "Challenge already finalized, response discarded");
                    return Ok(());
                }
                self.ctx.store.update_last_used(&self.device.id, now)?;
                self.write_relay(id, RelayWrite::Publish(response)).await?;
                info!(device_id = %self.device.id, challenge = %id, "Challenge answered");
            }
            None => {
                if self.ctx.store.record_canceled(id, now)? {
                    info!(device_id = %self.device.id, challenge = %id, "Challenge canceled");
                }
                self.write_relay(id, RelayWrite::Remove).await?;
            }
        }
        Ok(())
    }

    fn on_changed(&self, key: &str) {
        match self.ctx.store.load_challenge(key) {
            Ok(Some(challenge)) => debug!(
                challenge = %key,
                answered = challenge.response.is_some(),
                canceled = challenge.canceled,
                "Challenge changed"
            ),
            Ok(None) => debug!(challenge = %key, "Unknown challenge changed"),
            Err(e) => warn!(challenge = %key, error = %e, "Failed to refresh challenge"),
        }
    }

    fn on_removed(&self, key: &str) {
        let handles = self.cancel_handles();
        if let Some(pending) = handles.get(key) {
            info!(device_id = %self.device.id, challenge = %key, "Challenge withdrawn, canceling signature request");
            pending.cancel(());
        }
    }

    fn cancel_handles(&self) -> MutexGuard<'_, HashMap<String, PendingRequest<SignResponse>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChallengeProcessor {
    fn drop(&mut self) {
        for (challenge_id, pending) in self.cancel_handles().drain() {
            debug!(challenge = %challenge_id, "Canceling signature request of stopped processor");
            pending.cancel(());
        }
    }
}
