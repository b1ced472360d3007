//! Core functionality for the Keyward presence-gated signing engine.
//!
//! This crate provides the shared data model, configuration, logging,
//! base64 wire encoding and the local durable store used by the pairing
//! registry and the challenge stream processor.

pub mod config;
pub mod encoding;
pub mod error;
pub mod logging;
#[cfg(feature = "sqlite")]
pub mod store;
pub mod types;

pub use config::{Config, LoggingConfig, PolicyConfig, RemoteConfig, StorageConfig};
pub use error::{Error, Result};
#[cfg(feature = "sqlite")]
pub use store::Store;
pub use types::{current_timestamp, Challenge, Device};
