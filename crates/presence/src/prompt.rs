//! User-presence prompt seam.
//!
//! Platforms implement [`PresencePrompt`] on top of their biometric or
//! device-credential dialog. An implementation must return promptly once the
//! supplied [`CancellationSignal`] is cancelled, reporting it as
//! [`PromptEvent::Error`].

use async_trait::async_trait;

use crate::cancel::CancellationSignal;

/// Text shown to the user while they are asked to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: String,
    pub subtitle: String,
}

impl PromptRequest {
    /// Standard prompt for a signing request from a paired peer.
    pub fn for_device(device_name: &str) -> Self {
        Self {
            title: "Allow access to your computer".to_string(),
            subtitle: format!("Device {device_name}"),
        }
    }
}

/// What a single prompt attempt reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    /// The user authenticated; the signature context may be used.
    Authenticated,
    /// The user pressed the negative button.
    NegativeAction,
    /// Non-terminal hint (bad finger placement, not recognized). The prompt
    /// stays up.
    Help(String),
    /// The prompt ended with an error, including cancellation.
    Error { code: i32, message: String },
}

#[async_trait]
pub trait PresencePrompt: Send + Sync {
    /// Show the prompt once and report how it ended.
    async fn authenticate(&self, request: &PromptRequest, signal: CancellationSignal)
        -> PromptEvent;
}
