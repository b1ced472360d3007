//! Presence-gated signing state machine.
//!
//! One [`SigningOperation`] per request. The operation owns the domain
//! cancel flag and the current prompt [`CancellationSignal`]; a
//! [`GateCancelHandle`] lets another task abort it. A signal found cancelled
//! without the domain flag set is a platform artifact (screen switched off
//! while a previous cancel was still propagating) and leads to a re-prompt
//! with a fresh signal and the same signature context.

use keyward_crypto::{HardwareKeyStore, SignatureContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationSignal;
use crate::prompt::{PresencePrompt, PromptEvent, PromptRequest};

/// Gate state of one signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Prompting,
    Retrying,
    Succeeded,
    Canceled,
    Failed,
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled | Self::Failed)
    }
}

/// Terminal result of one signing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// DER signature over the requested message
    Signed(Vec<u8>),
    /// The user or the caller canceled
    Canceled,
    /// Prompt or key store hard failure
    Failed(String),
}

impl GateOutcome {
    /// Signature bytes, or `None` for both cancellation and failure.
    pub fn into_signature(self) -> Option<Vec<u8>> {
        match self {
            Self::Signed(signature) => Some(signature),
            Self::Canceled | Self::Failed(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct CancelState {
    requested: AtomicBool,
    signal: Mutex<CancellationSignal>,
}

impl CancelState {
    fn signal(&self) -> MutexGuard<'_, CancellationSignal> {
        self.signal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Aborts a signing operation from any thread.
#[derive(Debug, Clone)]
pub struct GateCancelHandle {
    state: Arc<CancelState>,
}

impl GateCancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
        self.state.signal().cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }
}

/// A single request to sign `message` with the key under `alias`.
#[derive(Debug)]
pub struct SigningOperation {
    alias: String,
    message: Vec<u8>,
    cancel: Arc<CancelState>,
    history: Vec<GateState>,
}

impl SigningOperation {
    pub fn new(alias: impl Into<String>, message: Vec<u8>) -> Self {
        Self {
            alias: alias.into(),
            message,
            cancel: Arc::new(CancelState::default()),
            history: vec![GateState::Idle],
        }
    }

    pub fn cancel_handle(&self) -> GateCancelHandle {
        GateCancelHandle {
            state: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> GateState {
        self.history.last().copied().unwrap_or(GateState::Idle)
    }

    /// Every state the operation passed through, starting with `Idle`.
    pub fn history(&self) -> &[GateState] {
        &self.history
    }

    fn transition(&mut self, next: GateState) {
        if self.state() != next {
            debug!(alias = %self.alias, from = ?self.state(), to = ?next, "Gate transition");
            self.history.push(next);
        }
    }

    fn canceled(&self) -> bool {
        self.cancel.requested.load(Ordering::SeqCst)
    }

    fn current_signal(&self) -> CancellationSignal {
        self.cancel.signal().clone()
    }

    fn renew_signal(&self) -> CancellationSignal {
        let mut signal = self.cancel.signal();
        *signal = CancellationSignal::new();
        // A domain cancel that raced the swap must still reach the new signal.
        if self.canceled() {
            signal.cancel();
        }
        signal.clone()
    }
}

/// Presence-gated signer over a hardware key store.
pub struct SigningGate {
    keystore: Arc<dyn HardwareKeyStore>,
    prompt: Arc<dyn PresencePrompt>,
    max_retries: u32,
}

impl SigningGate {
    pub fn new(
        keystore: Arc<dyn HardwareKeyStore>,
        prompt: Arc<dyn PresencePrompt>,
        max_retries: u32,
    ) -> Self {
        Self {
            keystore,
            prompt,
            max_retries,
        }
    }

    /// Drive `operation` to exactly one terminal outcome.
    pub async fn sign(&self, operation: &mut SigningOperation, request: &PromptRequest) -> GateOutcome {
        if operation.state().is_terminal() {
            return GateOutcome::Failed("signing operation already finished".to_string());
        }

        let mut context = match self.keystore.signature_context(&operation.alias) {
            Ok(context) => context,
            Err(e) => return self.finish(operation, GateOutcome::Failed(e.to_string())),
        };

        let mut retries = 0u32;
        loop {
            if operation.canceled() {
                return self.finish(operation, GateOutcome::Canceled);
            }

            operation.transition(GateState::Prompting);
            let signal = operation.current_signal();
            let event = self.prompt.authenticate(request, signal.clone()).await;

            match event {
                PromptEvent::Authenticated => {
                    let outcome = sign_unlocked(context.as_mut(), &operation.message);
                    return self.finish(operation, outcome);
                }
                PromptEvent::NegativeAction => {
                    operation.cancel_handle().cancel();
                    return self.finish(operation, GateOutcome::Canceled);
                }
                PromptEvent::Help(hint) => {
                    debug!(alias = %operation.alias, hint = %hint, "Prompt help");
                }
                PromptEvent::Error { code, message } => {
                    if operation.canceled() {
                        return self.finish(operation, GateOutcome::Canceled);
                    }
                    if !signal.is_cancelled() {
                        signal.cancel();
                        return self.finish(
                            operation,
                            GateOutcome::Failed(format!("prompt error {code}: {message}")),
                        );
                    }
                    if retries >= self.max_retries {
                        return self.finish(
                            operation,
                            GateOutcome::Failed(format!(
                                "prompt cancelled by platform {retries} times, last error {code}: {message}"
                            )),
                        );
                    }

                    retries += 1;
                    warn!(
                        alias = %operation.alias,
                        code = code,
                        attempt = retries,
                        "Prompt cancelled without a cancel request, prompting again"
                    );
                    operation.transition(GateState::Retrying);
                    operation.renew_signal();
                }
            }
        }
    }

    fn finish(&self, operation: &mut SigningOperation, outcome: GateOutcome) -> GateOutcome {
        match &outcome {
            GateOutcome::Signed(_) => {
                operation.transition(GateState::Succeeded);
                info!(alias = %operation.alias, "Challenge signed");
            }
            GateOutcome::Canceled => {
                operation.transition(GateState::Canceled);
                info!(alias = %operation.alias, "Signing canceled");
            }
            GateOutcome::Failed(reason) => {
                operation.transition(GateState::Failed);
                error!(alias = %operation.alias, reason = %reason, "Signing failed");
            }
        }
        outcome
    }
}

fn sign_unlocked(context: &mut dyn SignatureContext, message: &[u8]) -> GateOutcome {
    context.unlock();
    match context.sign(message) {
        Ok(signature) => GateOutcome::Signed(signature),
        Err(e) => GateOutcome::Failed(e.to_string()),
    }
}
