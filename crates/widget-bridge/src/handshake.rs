//! Handshake state and the host's answer to `ui/initialize`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeState {
    Uninstalled,
    Installed,
    AwaitingHandshake,
    Ready,
}

impl BridgeState {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Uninstalled)
    }
}

/// How a backend opens the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    /// Send `ui/initialize` and wait for the answer.
    Negotiate,
    /// Host state is readable right away; seed the context and go ready.
    Immediate(ContextPatch),
}

/// Result of a successful `ui/initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_capabilities: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_context: Option<Value>,
}

impl InitializeResult {
    /// Lenient read; unknown or mistyped fields never fail the handshake.
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).filter(|field| !field.is_null()).cloned();
        Self {
            protocol_version: value
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            host_info: field("hostInfo"),
            host_capabilities: field("hostCapabilities"),
            host_context: field("hostContext"),
        }
    }

    pub fn context_patch(&self) -> ContextPatch {
        self.host_context
            .as_ref()
            .map(ContextPatch::from_host_context)
            .unwrap_or_default()
    }
}
