//! Host backends and the selector that picks one.
//!
//! Both backends sit behind the same legacy-facing surface. The message
//! passing backend exchanges JSON-RPC envelopes over a [`HostChannel`]; the
//! capability backend calls a [`HostCapabilities`] object the host exposes.

mod capability;
mod rpc;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::InboundHandle;
use crate::config::{CapabilityConfig, IntentHandling};
use crate::envelope::RequestId;
use crate::handshake::Handshake;
use crate::shim::OutboundSink;
use crate::tables::{HostNotification, HostRequest};

pub use capability::{CapabilityBackend, GlobalsListener, HostCapabilities};
pub use rpc::{HostChannel, InboundListener, ListenerId, RpcBackend};

pub const MESSAGE_PASSING_MIME_TYPE: &str = "text/html;profile=mcp-app";
pub const CAPABILITY_OBJECT_MIME_TYPE: &str = "text/html+skybridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    MessagePassing,
    CapabilityObject,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessagePassing => "message-passing",
            Self::CapabilityObject => "capability-object",
        }
    }

    /// Mime type a resource declares to select this backend.
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::MessagePassing => MESSAGE_PASSING_MIME_TYPE,
            Self::CapabilityObject => CAPABILITY_OBJECT_MIME_TYPE,
        }
    }

    /// Backend for a declared resource mime type; parameters other than
    /// `profile` are ignored.
    #[must_use]
    pub fn from_mime_type(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let mut parts = normalized.split(';').map(str::trim);
        let essence = parts.next()?;
        let profile = parts
            .filter_map(|part| part.split_once('='))
            .find(|(key, _)| key.trim() == "profile")
            .map(|(_, value)| value.trim().trim_matches('"').to_string());

        match (essence, profile.as_deref()) {
            ("text/html", Some("mcp-app")) => Some(Self::MessagePassing),
            ("text/html+skybridge", _) => Some(Self::CapabilityObject),
            _ => None,
        }
    }
}

/// Host side of a bridge.
///
/// Implementations must not call back into the bridge from `is_available`;
/// every other method runs outside the bridge lock.
pub trait HostBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether an upstream host is reachable right now.
    fn is_available(&self) -> bool;

    /// Attaches the inbound listener.
    fn connect(&self, inbound: InboundHandle);

    /// Detaches the inbound listener.
    fn disconnect(&self);

    fn handshake(&self) -> Handshake;

    /// Sends a correlated request; the answer comes back through
    /// [`InboundHandle::complete`] or [`InboundHandle::deliver`].
    fn request(&self, id: RequestId, request: HostRequest);

    fn notify(&self, notification: HostNotification);

    /// Answers a request the host issued.
    fn respond(&self, id: RequestId, outcome: Result<Value, Value>);

    fn intent_handling(&self) -> IntentHandling {
        IntentHandling::Prompt
    }

    /// Origin stamped on synthetic widget messages.
    fn origin(&self) -> Option<String> {
        None
    }
}

/// Backend choice made when the bridge is built.
pub enum BackendSelection {
    MessagePassing {
        channel: Option<Arc<dyn HostChannel>>,
    },
    CapabilityObject {
        capabilities: Option<Arc<dyn HostCapabilities>>,
        /// Original send primitive for non-legacy widget traffic.
        forward: Option<Arc<dyn OutboundSink>>,
        config: CapabilityConfig,
    },
}

impl BackendSelection {
    /// Backend plus the primitive the shim forwards unrecognized traffic to.
    pub(crate) fn build(self) -> (Arc<dyn HostBackend>, Option<Arc<dyn OutboundSink>>) {
        match self {
            Self::MessagePassing { channel } => {
                let rpc = Arc::new(RpcBackend::new(channel));
                let forward: Arc<dyn OutboundSink> = rpc.clone();
                let backend: Arc<dyn HostBackend> = rpc;
                (backend, Some(forward))
            }
            Self::CapabilityObject {
                capabilities,
                forward,
                config,
            } => {
                let backend: Arc<dyn HostBackend> =
                    Arc::new(CapabilityBackend::new(capabilities, config));
                (backend, forward)
            }
        }
    }
}
