//! Render context kept by the bridge and projected back to the widget.
//!
//! The context only ever grows by merge: a patch sets the fields it carries
//! and leaves every other field at its last known value. Every push sends the
//! whole context, never a delta.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::legacy::{LegacyMessage, UI_LIFECYCLE_IFRAME_RENDER_DATA};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
}

/// Partial update; every `Some` field overwrites, `None` means "unchanged".
///
/// Also the shape of the globals a capability-object host exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn tool_input(arguments: Value) -> Self {
        Self {
            tool_input: Some(arguments),
            ..Self::default()
        }
    }

    /// Tool output from a CallToolResult: structured content when the host
    /// provided it, the whole result otherwise.
    pub fn from_tool_result(result: Value) -> Self {
        let output = match result.get("structuredContent") {
            Some(structured) if !structured.is_null() => structured.clone(),
            _ => result,
        };
        Self {
            tool_output: Some(output),
            ..Self::default()
        }
    }

    /// Subset of a host-context object the widget can see.
    ///
    /// `maxHeight` is read from `viewport.maxHeight`, falling back to a
    /// top-level `maxHeight`.
    pub fn from_host_context(context: &Value) -> Self {
        let string_field = |key: &str| {
            context
                .get(key)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        };
        let max_height = context
            .get("viewport")
            .and_then(|viewport| viewport.get("maxHeight"))
            .and_then(Value::as_f64)
            .or_else(|| context.get("maxHeight").and_then(Value::as_f64));

        Self {
            locale: string_field("locale"),
            theme: string_field("theme"),
            display_mode: string_field("displayMode"),
            max_height,
            ..Self::default()
        }
    }

    /// Host-driven size change; an explicit `maxHeight` wins over `height`.
    pub fn from_size_change(params: &Value) -> Self {
        let max_height = params
            .get("maxHeight")
            .and_then(Value::as_f64)
            .or_else(|| params.get("height").and_then(Value::as_f64));
        Self {
            max_height,
            ..Self::default()
        }
    }
}

impl RenderContext {
    pub fn merge(&mut self, patch: ContextPatch) {
        let ContextPatch {
            tool_input,
            tool_output,
            widget_state,
            locale,
            theme,
            display_mode,
            max_height,
        } = patch;

        if tool_input.is_some() {
            self.tool_input = tool_input;
        }
        if tool_output.is_some() {
            self.tool_output = tool_output;
        }
        if widget_state.is_some() {
            self.widget_state = widget_state;
        }
        if locale.is_some() {
            self.locale = locale;
        }
        if theme.is_some() {
            self.theme = theme;
        }
        if display_mode.is_some() {
            self.display_mode = display_mode;
        }
        if max_height.is_some() {
            self.max_height = max_height;
        }
    }

    /// Full snapshot as a `ui-lifecycle-iframe-render-data` message,
    /// tagged with the requester's id when there is one.
    pub fn project(&self, requested_by: Option<&str>) -> LegacyMessage {
        let render_data = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        let message = LegacyMessage::new(UI_LIFECYCLE_IFRAME_RENDER_DATA)
            .with_payload(json!({ "renderData": render_data }));
        match requested_by {
            Some(message_id) => message.with_message_id(message_id),
            None => message,
        }
    }
}
