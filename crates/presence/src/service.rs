//! Mediator-facing front of the signing gate.

use keyward_bus::{Correlated, CorrelationMediator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gate::{SigningGate, SigningOperation};
use crate::prompt::PromptRequest;

/// Ask the holder to sign `message` with the key under `key_alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub device_id: String,
    pub device_name: String,
    pub key_alias: String,
    pub message: Vec<u8>,
}

/// Exactly one per request; `None` means canceled or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    pub signature: Option<Vec<u8>>,
}

/// Mediator carrying sign requests; cancel payloads are empty.
pub type SigningMediator = CorrelationMediator<SignResponse, ()>;

/// Runs the signing gate for every request sent to its inbox.
pub struct GateService;

impl GateService {
    /// Spawn the service loop. Dropping every sender stops it.
    pub fn spawn(
        gate: Arc<SigningGate>,
        mediator: SigningMediator,
    ) -> (mpsc::UnboundedSender<Correlated<SignRequest>>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Correlated<SignRequest>>();

        let handle = tokio::spawn(async move {
            info!("Signing gate service started");
            while let Some(message) = rx.recv().await {
                tokio::spawn(Self::handle(gate.clone(), mediator.clone(), message));
            }
            info!("Signing gate service stopped");
        });

        (tx, handle)
    }

    async fn handle(gate: Arc<SigningGate>, mediator: SigningMediator, message: Correlated<SignRequest>) {
        let request = &message.body;
        let mut operation = SigningOperation::new(request.key_alias.clone(), request.message.clone());

        let cancel = operation.cancel_handle();
        if let Err(e) = mediator.await_cancel(&message, move |()| cancel.cancel()) {
            warn!(device_id = %request.device_id, error = %e, "Cancel listener not armed");
        }

        debug!(device_id = %request.device_id, alias = %request.key_alias, "Sign request received");
        let prompt = PromptRequest::for_device(&request.device_name);
        let outcome = gate.sign(&mut operation, &prompt).await;

        let delivery = mediator.respond(
            &message,
            SignResponse {
                signature: outcome.into_signature(),
            },
        );
        debug!(device_id = %request.device_id, delivery = ?delivery, "Sign response published");
    }
}
