//! Host-protocol JSON-RPC envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEnvelope {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, Value>,
    },
}

impl HostEnvelope {
    /// Classifies an inbound value; `None` when it lacks the envelope shape.
    pub fn parse(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        if let Some(method) = object.get("method") {
            let method = method.as_str()?.to_string();
            let params = object.get("params").cloned();
            return match object.get("id") {
                Some(id) => {
                    let id = serde_json::from_value::<RequestId>(id.clone()).ok()?;
                    Some(Self::Request { id, method, params })
                }
                None => Some(Self::Notification { method, params }),
            };
        }

        let id = serde_json::from_value::<RequestId>(object.get("id")?.clone()).ok()?;
        let outcome = if let Some(error) = object.get("error") {
            Err(error.clone())
        } else if let Some(result) = object.get("result") {
            Ok(result.clone())
        } else {
            return None;
        };
        Some(Self::Response { id, outcome })
    }

    pub fn request(id: &RequestId, method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        })
    }

    pub fn notification(method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        })
    }

    pub fn result(id: &RequestId, result: Value) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        })
    }

    pub fn error(id: &RequestId, error: Value) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": error,
        })
    }

    pub fn error_object(code: i64, message: &str) -> Value {
        json!({ "code": code, "message": message })
    }
}
