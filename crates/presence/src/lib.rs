//! Presence-gated signing for Keyward.
//!
//! The [`SigningGate`] loads a key store signature context, shows a
//! user-presence prompt and signs only after the user authenticated. The
//! [`GateService`] exposes the gate to other components through the
//! correlation mediator: callers send a [`SignRequest`] and receive exactly
//! one [`SignResponse`].
//!
//! # State Transitions
//!
//! ```text
//! Idle
//!   ↓ (prompt shown)
//! Prompting ──(platform cancelled the prompt on its own)──→ Retrying ──→ Prompting
//!   ↓ authenticated   ↓ user/caller cancel   ↓ prompt error
//! Succeeded          Canceled               Failed
//! ```

pub mod cancel;
pub mod gate;
pub mod prompt;
pub mod service;

pub use cancel::CancellationSignal;
pub use gate::{GateCancelHandle, GateOutcome, GateState, SigningGate, SigningOperation};
pub use prompt::{PresencePrompt, PromptEvent, PromptRequest};
pub use service::{GateService, SignRequest, SignResponse, SigningMediator};
