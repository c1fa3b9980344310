//! Legacy tagged-message vocabulary spoken by widgets.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{BridgeError, Result};

pub const RESERVED_PREFIX: &str = "ui-";

pub const TOOL: &str = "tool";
pub const PROMPT: &str = "prompt";
pub const LINK: &str = "link";
pub const INTENT: &str = "intent";
pub const NOTIFY: &str = "notify";
pub const UI_SIZE_CHANGE: &str = "ui-size-change";
pub const UI_REQUEST_RENDER_DATA: &str = "ui-request-render-data";
pub const UI_LIFECYCLE_IFRAME_READY: &str = "ui-lifecycle-iframe-ready";

pub const UI_MESSAGE_RECEIVED: &str = "ui-message-received";
pub const UI_MESSAGE_RESPONSE: &str = "ui-message-response";
pub const UI_LIFECYCLE_IFRAME_RENDER_DATA: &str = "ui-lifecycle-iframe-render-data";
pub const UI_LIFECYCLE_TOOL_CANCELLED: &str = "ui-lifecycle-tool-cancelled";
pub const UI_LIFECYCLE_TEARDOWN: &str = "ui-lifecycle-teardown";

/// Types a widget may send outward.
pub const OUTBOUND_MESSAGE_TYPES: &[&str] = &[
    TOOL,
    PROMPT,
    LINK,
    INTENT,
    NOTIFY,
    UI_SIZE_CHANGE,
    UI_REQUEST_RENDER_DATA,
    UI_LIFECYCLE_IFRAME_READY,
];

/// Types only the bridge produces.
pub const SYNTHETIC_MESSAGE_TYPES: &[&str] = &[
    UI_MESSAGE_RECEIVED,
    UI_MESSAGE_RESPONSE,
    UI_LIFECYCLE_IFRAME_RENDER_DATA,
    UI_LIFECYCLE_TOOL_CANCELLED,
    UI_LIFECYCLE_TEARDOWN,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl LegacyMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message_id: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Reads a value the widget posted; `None` unless it is a legacy message.
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type").and_then(Value::as_str)?;
        if !is_legacy_type(kind) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "type": self.kind }))
    }

    /// Payload decoded into a typed shape, `{}` when absent.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self
            .payload
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(payload).map_err(|err| BridgeError::InvalidPayload(err.to_string()))
    }

    pub fn received(message_id: &str) -> Self {
        Self::new(UI_MESSAGE_RECEIVED)
            .with_message_id(message_id)
            .with_payload(json!({ "messageId": message_id }))
    }

    pub fn response(message_id: &str, response: Option<Value>, error: Option<Value>) -> Self {
        let mut payload = Map::new();
        payload.insert("messageId".into(), Value::String(message_id.to_string()));
        if let Some(response) = response {
            payload.insert("response".into(), response);
        }
        if let Some(error) = error {
            payload.insert("error".into(), error);
        }
        Self::new(UI_MESSAGE_RESPONSE)
            .with_message_id(message_id)
            .with_payload(Value::Object(payload))
    }
}

/// True for the fixed vocabulary and anything under the reserved prefix.
pub fn is_legacy_type(kind: &str) -> bool {
    kind.starts_with(RESERVED_PREFIX) || OUTBOUND_MESSAGE_TYPES.contains(&kind)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPayload {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptPayload {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkPayload {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentPayload {
    pub intent: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotifyPayload {
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SizePayload {
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}
