//! Bridge configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_TIMEOUT_MS: &str = "WIDGET_BRIDGE_TIMEOUT_MS";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const PROTOCOL_VERSION: &str = "2025-11-21";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Settings recognized by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Per-request timeout in milliseconds, handshake included.
    pub timeout: u64,
    pub app_info: AppInfo,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            app_info: AppInfo::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with `WIDGET_BRIDGE_TIMEOUT_MS` applied when it parses.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(raw) = env_non_empty(ENV_TIMEOUT_MS) {
            match raw.parse::<u64>() {
                Ok(timeout) if timeout > 0 => self.timeout = timeout,
                _ => {
                    tracing::warn!(value = %raw, "Ignoring invalid WIDGET_BRIDGE_TIMEOUT_MS");
                }
            }
        }
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// What the capability-object backend does with `intent` messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentHandling {
    /// Forward the intent as a follow-up message.
    #[default]
    Prompt,
    /// Acknowledge and answer with an empty response.
    Ignore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityConfig {
    pub intent_handling: IntentHandling,
    /// Origin stamped on synthetic messages delivered to the widget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_origin: Option<String>,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
