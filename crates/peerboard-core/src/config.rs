//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration must be a JSON object")]
    NotAnObject,
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint of the broker.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// How long a guest waits for the host to accept.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Maximum pages in one import.
    #[serde(default = "default_max_import_pages")]
    pub max_import_pages: usize,
}

fn default_broker_url() -> String {
    "ws://localhost:3030/ws".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_max_import_pages() -> usize {
    20
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_import_pages: default_max_import_pages(),
        }
    }
}

impl SessionConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Defaults overridden by `PEERBOARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from a key lookup (normally the process environment).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("PEERBOARD_BROKER_URL") {
            self.broker_url = url;
        }
        if let Some(value) = lookup("PEERBOARD_HANDSHAKE_TIMEOUT_MS") {
            self.handshake_timeout_ms = parse("PEERBOARD_HANDSHAKE_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("PEERBOARD_MAX_IMPORT_PAGES") {
            self.max_import_pages = parse("PEERBOARD_MAX_IMPORT_PAGES", value)?;
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
