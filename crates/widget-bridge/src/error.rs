//! Bridge error types.

use serde_json::Value;
use thiserror::Error;

/// Literal error string the widget receives when a request times out.
pub const TIMEOUT_ERROR: &str = "Timeout";

/// Error string used when pending requests are drained by `uninstall()`.
pub const UNINSTALLED_ERROR: &str = "adapter uninstalled";

/// Bridge error type.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("request timed out")]
    Timeout,

    /// The host answered with an error object; kept verbatim.
    #[error("host error: {0}")]
    Upstream(Value),

    #[error("adapter uninstalled")]
    Uninstalled,

    #[error("bridge is not installed")]
    NotInstalled,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Error payload as it is reported to the widget inside a
    /// `ui-message-response`.
    pub fn to_widget_value(&self) -> Value {
        match self {
            Self::Timeout => Value::String(TIMEOUT_ERROR.to_string()),
            Self::Upstream(error) => error.clone(),
            Self::Uninstalled => Value::String(UNINSTALLED_ERROR.to_string()),
            other => Value::String(other.to_string()),
        }
    }
}

/// Bridge result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widget_values_keep_wire_literals() {
        assert_eq!(BridgeError::Timeout.to_widget_value(), json!("Timeout"));
        assert_eq!(
            BridgeError::Uninstalled.to_widget_value(),
            json!("adapter uninstalled")
        );
        let upstream = json!({"code": -32000, "message": "boom"});
        assert_eq!(
            BridgeError::Upstream(upstream.clone()).to_widget_value(),
            upstream
        );
        assert_eq!(
            BridgeError::InvalidPayload("missing toolName".into()).to_widget_value(),
            json!("invalid payload: missing toolName")
        );
    }
}
