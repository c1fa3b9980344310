//! Translation tables between the legacy vocabulary and host methods.

use serde_json::{Value, json};

use crate::config::{AppInfo, PROTOCOL_VERSION};
use crate::context::ContextPatch;
use crate::error::Result;
use crate::legacy::{
    self, IntentPayload, LegacyMessage, LinkPayload, NotifyPayload, PromptPayload, SizePayload,
    ToolPayload,
};

pub const INITIALIZE: &str = "ui/initialize";
pub const INITIALIZED: &str = "ui/notifications/initialized";
pub const TOOLS_CALL: &str = "tools/call";
pub const MESSAGE: &str = "ui/message";
pub const OPEN_LINK: &str = "ui/open-link";
pub const SIZE_CHANGED: &str = "ui/notifications/size-changed";
pub const LOGGING_MESSAGE: &str = "notifications/message";

pub const TOOL_INPUT: &str = "ui/notifications/tool-input";
pub const TOOL_INPUT_PARTIAL: &str = "ui/notifications/tool-input-partial";
pub const TOOL_RESULT: &str = "ui/notifications/tool-result";
pub const TOOL_CANCELLED: &str = "ui/notifications/tool-cancelled";
pub const HOST_CONTEXT_CHANGED: &str = "ui/notifications/host-context-changed";
pub const RESOURCE_TEARDOWN: &str = "ui/resource-teardown";

/// Legacy request types and the host request each becomes.
pub const LEGACY_REQUEST_METHODS: &[(&str, &str)] = &[
    (legacy::TOOL, TOOLS_CALL),
    (legacy::PROMPT, MESSAGE),
    (legacy::INTENT, MESSAGE),
    (legacy::LINK, OPEN_LINK),
];

/// Fire-and-forget legacy types and the host notification each becomes.
pub const LEGACY_NOTIFICATION_METHODS: &[(&str, &str)] = &[
    (legacy::UI_SIZE_CHANGE, SIZE_CHANGED),
    (legacy::NOTIFY, LOGGING_MESSAGE),
];

/// Host methods and the synthetic legacy message each produces.
pub const HOST_METHOD_TO_LEGACY: &[(&str, &str)] = &[
    (TOOL_INPUT, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA),
    (TOOL_INPUT_PARTIAL, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA),
    (TOOL_RESULT, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA),
    (HOST_CONTEXT_CHANGED, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA),
    (SIZE_CHANGED, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA),
    (TOOL_CANCELLED, legacy::UI_LIFECYCLE_TOOL_CANCELLED),
    (RESOURCE_TEARDOWN, legacy::UI_LIFECYCLE_TEARDOWN),
];

pub fn host_method_for(legacy_type: &str) -> Option<&'static str> {
    LEGACY_REQUEST_METHODS
        .iter()
        .chain(LEGACY_NOTIFICATION_METHODS)
        .find(|(kind, _)| *kind == legacy_type)
        .map(|(_, method)| *method)
}

pub fn legacy_type_for(host_method: &str) -> Option<&'static str> {
    HOST_METHOD_TO_LEGACY
        .iter()
        .find(|(method, _)| *method == host_method)
        .map(|(_, kind)| *kind)
}

/// Backend-neutral request toward the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    Initialize { app_info: AppInfo },
    CallTool { name: String, arguments: Value },
    SendMessage { text: String },
    OpenLink { url: String },
    /// Embedder-issued request passed through untouched.
    Raw { method: String, params: Value },
}

impl HostRequest {
    pub fn method(&self) -> &str {
        match self {
            Self::Initialize { .. } => INITIALIZE,
            Self::CallTool { .. } => TOOLS_CALL,
            Self::SendMessage { .. } => MESSAGE,
            Self::OpenLink { .. } => OPEN_LINK,
            Self::Raw { method, .. } => method,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            Self::Initialize { app_info } => json!({
                "appInfo": app_info,
                "appCapabilities": {},
                "protocolVersion": PROTOCOL_VERSION,
            }),
            Self::CallTool { name, arguments } => json!({
                "name": name,
                "arguments": arguments,
            }),
            Self::SendMessage { text } => json!({
                "role": "user",
                "content": [{ "type": "text", "text": text }],
            }),
            Self::OpenLink { url } => json!({ "url": url }),
            Self::Raw { params, .. } => params.clone(),
        }
    }
}

/// Backend-neutral notification toward the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostNotification {
    Initialized,
    SizeChanged {
        width: Option<f64>,
        height: Option<f64>,
    },
    Log {
        level: &'static str,
        data: Value,
    },
}

impl HostNotification {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialized => INITIALIZED,
            Self::SizeChanged { .. } => SIZE_CHANGED,
            Self::Log { .. } => LOGGING_MESSAGE,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            Self::Initialized => json!({}),
            Self::SizeChanged { width, height } => {
                let mut params = serde_json::Map::new();
                if let Some(width) = width {
                    params.insert("width".into(), json!(width));
                }
                if let Some(height) = height {
                    params.insert("height".into(), json!(height));
                }
                Value::Object(params)
            }
            Self::Log { level, data } => json!({ "level": level, "data": data }),
        }
    }
}

/// What one outbound legacy message turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Request(HostRequest),
    /// Request the host cannot express; the widget still gets an answer.
    Intent { intent: String, params: Value },
    Notification(HostNotification),
    RenderDataRequest,
    IframeReady,
    /// Reserved-prefix type with no translation.
    Unhandled,
}

/// Maps a legacy message onto the host vocabulary.
///
/// Errors only for request types whose payload lacks required fields.
pub fn translate_outbound(message: &LegacyMessage) -> Result<Outbound> {
    let outbound = match message.kind.as_str() {
        legacy::TOOL => {
            let payload: ToolPayload = message.decode_payload()?;
            Outbound::Request(HostRequest::CallTool {
                name: payload.tool_name,
                arguments: object_or_empty(payload.params),
            })
        }
        legacy::PROMPT => {
            let payload: PromptPayload = message.decode_payload()?;
            Outbound::Request(HostRequest::SendMessage {
                text: payload.prompt,
            })
        }
        legacy::LINK => {
            let payload: LinkPayload = message.decode_payload()?;
            Outbound::Request(HostRequest::OpenLink { url: payload.url })
        }
        legacy::INTENT => {
            let payload: IntentPayload = message.decode_payload()?;
            Outbound::Intent {
                intent: payload.intent,
                params: object_or_empty(payload.params),
            }
        }
        legacy::NOTIFY => {
            let payload: NotifyPayload = message.decode_payload().unwrap_or(NotifyPayload {
                message: Value::Null,
            });
            Outbound::Notification(HostNotification::Log {
                level: "info",
                data: payload.message,
            })
        }
        legacy::UI_SIZE_CHANGE => {
            let payload: SizePayload = message.decode_payload().unwrap_or_default();
            Outbound::Notification(HostNotification::SizeChanged {
                width: payload.width,
                height: payload.height,
            })
        }
        legacy::UI_REQUEST_RENDER_DATA => Outbound::RenderDataRequest,
        legacy::UI_LIFECYCLE_IFRAME_READY => Outbound::IframeReady,
        _ => Outbound::Unhandled,
    };
    Ok(outbound)
}

/// Text used when an intent travels as a conversational message.
pub fn intent_message_text(intent: &str, params: &Value) -> String {
    let params = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
    format!("Intent: {intent}. Parameters: {params}")
}

/// Inbound host method mapped onto bridge behaviour.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Context(ContextPatch),
    ToolCancelled(Option<Value>),
    Teardown(Option<Value>),
    Unknown,
}

pub fn translate_inbound(method: &str, params: Option<Value>) -> Inbound {
    let params_or_empty = || params.clone().unwrap_or_else(|| json!({}));
    match method {
        TOOL_INPUT | TOOL_INPUT_PARTIAL => {
            let arguments = params
                .as_ref()
                .and_then(|params| params.get("arguments"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            Inbound::Context(ContextPatch::tool_input(arguments))
        }
        TOOL_RESULT => Inbound::Context(ContextPatch::from_tool_result(params_or_empty())),
        HOST_CONTEXT_CHANGED => {
            Inbound::Context(ContextPatch::from_host_context(&params_or_empty()))
        }
        SIZE_CHANGED => Inbound::Context(ContextPatch::from_size_change(&params_or_empty())),
        TOOL_CANCELLED => Inbound::ToolCancelled(params),
        RESOURCE_TEARDOWN => Inbound::Teardown(params),
        _ => Inbound::Unknown,
    }
}

fn object_or_empty(value: Value) -> Value {
    if value.is_null() { json!({}) } else { value }
}
