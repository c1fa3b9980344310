//! Capability-object backend: the host hands the widget an object with
//! methods instead of speaking JSON-RPC.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{BackendKind, HostBackend};
use crate::bridge::InboundHandle;
use crate::config::{CapabilityConfig, IntentHandling};
use crate::context::ContextPatch;
use crate::envelope::RequestId;
use crate::error::BridgeError;
use crate::handshake::Handshake;
use crate::tables::{HostNotification, HostRequest};

pub type GlobalsListener = Box<dyn Fn(ContextPatch) + Send + Sync>;

/// Capability object exposed directly by the host.
///
/// Errors are host error objects and reach the widget unchanged.
#[async_trait]
pub trait HostCapabilities: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, Value>;

    async fn send_follow_up_message(&self, prompt: &str) -> Result<(), Value>;

    async fn open_external(&self, href: &str) -> Result<(), Value>;

    fn notify_intrinsic_height(&self, height: f64);

    /// Current host globals (tool input/output, widget state, theme, ...).
    fn globals(&self) -> ContextPatch;

    /// Registers the single watcher for globals changes, replacing any
    /// earlier one.
    fn watch_globals(&self, listener: GlobalsListener);

    fn unwatch_globals(&self);
}

pub struct CapabilityBackend {
    capabilities: Option<Arc<dyn HostCapabilities>>,
    config: CapabilityConfig,
    inbound: Mutex<Option<InboundHandle>>,
}

impl CapabilityBackend {
    pub fn new(capabilities: Option<Arc<dyn HostCapabilities>>, config: CapabilityConfig) -> Self {
        Self {
            capabilities,
            config,
            inbound: Mutex::new(None),
        }
    }

    fn inbound(&self) -> Option<InboundHandle> {
        self.inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl HostBackend for CapabilityBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CapabilityObject
    }

    fn is_available(&self) -> bool {
        self.capabilities.is_some()
    }

    fn connect(&self, inbound: InboundHandle) {
        let Some(capabilities) = &self.capabilities else {
            return;
        };
        let watcher = inbound.clone();
        capabilities.watch_globals(Box::new(move |patch| watcher.apply_context(patch)));
        *self
            .inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(inbound);
    }

    fn disconnect(&self) {
        if let Some(capabilities) = &self.capabilities {
            capabilities.unwatch_globals();
        }
        self.inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    fn handshake(&self) -> Handshake {
        let globals = self
            .capabilities
            .as_ref()
            .map(|capabilities| capabilities.globals())
            .unwrap_or_default();
        Handshake::Immediate(globals)
    }

    fn request(&self, id: RequestId, request: HostRequest) {
        let Some(inbound) = self.inbound() else {
            tracing::warn!(%id, "Capability request issued while disconnected");
            return;
        };
        let Some(capabilities) = self.capabilities.clone() else {
            inbound.complete(id, Err(json!({ "message": "no host capability object" })));
            return;
        };

        let runtime = inbound.runtime().clone();
        runtime.spawn(async move {
            let outcome = match request {
                HostRequest::CallTool { name, arguments } => {
                    capabilities.call_tool(&name, arguments).await
                }
                HostRequest::SendMessage { text } => capabilities
                    .send_follow_up_message(&text)
                    .await
                    .map(|()| json!({})),
                HostRequest::OpenLink { url } => capabilities
                    .open_external(&url)
                    .await
                    .map(|()| json!({})),
                other => {
                    Err(BridgeError::Unsupported(other.method().to_string()).to_widget_value())
                }
            };
            inbound.complete(id, outcome);
        });
    }

    fn notify(&self, notification: HostNotification) {
        match notification {
            HostNotification::SizeChanged {
                height: Some(height),
                ..
            } => {
                if let Some(capabilities) = &self.capabilities {
                    capabilities.notify_intrinsic_height(height);
                }
            }
            HostNotification::SizeChanged { height: None, .. } => {}
            HostNotification::Log { level, data } => {
                tracing::info!(level, %data, "Widget notification");
            }
            HostNotification::Initialized => {}
        }
    }

    fn respond(&self, id: RequestId, _outcome: Result<Value, Value>) {
        tracing::debug!(%id, "Capability host issues no requests; dropping response");
    }

    fn intent_handling(&self) -> IntentHandling {
        self.config.intent_handling
    }

    fn origin(&self) -> Option<String> {
        self.config.host_origin.clone()
    }
}
