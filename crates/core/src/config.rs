//! Configuration management for Keyward.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Freshness and retry policy for incoming challenges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Challenges older than this are purged without prompting.
    pub stale_after_ms: u64,
    /// Challenges issued further than this in the future are purged.
    pub future_skew_ms: u64,
    /// Unanswered challenges are removed from the relay after this long.
    pub expire_after_ms: u64,
    /// Prompt re-issues tolerated for spurious platform cancellations.
    pub max_prompt_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

/// Layout of the remote event store tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Root under which peers publish challenges, keyed by device id.
    pub challenge_root: String,
    /// Root under which pairing responses are published, keyed by device id.
    pub info_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 35_000,
            future_skew_ms: 5_000,
            expire_after_ms: 45_000,
            max_prompt_retries: 3,
        }
    }
}

impl PolicyConfig {
    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "keyward.db".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            challenge_root: "c".to_string(),
            info_root: "i".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Namespace holding the challenges of one device.
    pub fn challenge_namespace(&self, device_id: &str) -> String {
        format!("{}/{}", self.challenge_root, device_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            policy: PolicyConfig::default(),
            storage: StorageConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.remote.challenge_root.is_empty() || self.remote.info_root.is_empty() {
            return Err(crate::Error::Config(
                "remote roots must not be empty".to_string(),
            ));
        }
        if self.policy.expire_after_ms <= self.policy.stale_after_ms {
            return Err(crate::Error::Config(format!(
                "expire_after_ms ({}) must exceed stale_after_ms ({})",
                self.policy.expire_after_ms, self.policy.stale_after_ms
            )));
        }
        Ok(())
    }
}
