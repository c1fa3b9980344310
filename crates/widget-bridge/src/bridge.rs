//! The installable bridge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::backend::{BackendKind, BackendSelection, HostBackend, ListenerId};
use crate::config::BridgeConfig;
use crate::context::{ContextPatch, RenderContext};
use crate::engine::{BridgeCore, Effect, Expire, Timers};
use crate::envelope::RequestId;
use crate::error::{BridgeError, Result};
use crate::handshake::{BridgeState, InitializeResult};
use crate::legacy::LegacyMessage;
use crate::shim::{ChannelShim, Intercept};

/// Synthetic legacy message delivered to the widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetEvent {
    pub origin: Option<String>,
    pub message: LegacyMessage,
}

pub type WidgetListener = Arc<dyn Fn(&WidgetEvent) + Send + Sync>;

/// Translator between a legacy widget and its host.
///
/// One bridge serves one widget. It is installed once; after `uninstall()`
/// the widget's traffic is forwarded unchanged again.
pub struct WidgetBridge {
    shared: Arc<Shared>,
}

struct Shared {
    core: Mutex<BridgeCore>,
    backend: Arc<dyn HostBackend>,
    shim: Arc<ChannelShim>,
    listeners: Mutex<Vec<(ListenerId, WidgetListener)>>,
    next_listener: AtomicU64,
    origin: Option<String>,
}

/// Entry point backends use to hand host traffic to the bridge.
///
/// Holds only a weak reference, so a dropped bridge turns every call into a
/// no-op.
#[derive(Clone)]
pub struct InboundHandle {
    bridge: Weak<Shared>,
    runtime: Handle,
}

impl InboundHandle {
    /// Raw value received from the host channel.
    pub fn deliver(&self, value: &Value) {
        if let Some(bridge) = self.bridge.upgrade() {
            let effects = bridge.core().inbound(value);
            bridge.dispatch(effects);
        }
    }

    /// Outcome of a request issued through [`HostBackend::request`].
    pub fn complete(&self, id: RequestId, outcome: std::result::Result<Value, Value>) {
        if let Some(bridge) = self.bridge.upgrade() {
            let effects = bridge.core().complete(&id, outcome);
            bridge.dispatch(effects);
        }
    }

    /// Host state change pushed outside the JSON-RPC envelope.
    pub fn apply_context(&self, patch: ContextPatch) {
        if let Some(bridge) = self.bridge.upgrade() {
            let effects = bridge.core().apply_context(patch);
            bridge.dispatch(effects);
        }
    }

    /// Runtime that owns the bridge's timers.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl WidgetBridge {
    pub fn new(selection: BackendSelection, config: BridgeConfig) -> Self {
        let (backend, forward) = selection.build();
        let core = BridgeCore::new(config, backend.intent_handling());
        let origin = backend.origin();
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                backend,
                shim: Arc::new(ChannelShim::new(forward)),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                origin,
            }),
        }
    }

    /// Intercepts the widget's traffic and opens the host session.
    ///
    /// Returns `false` without side effects when the bridge was installed
    /// before, no tokio runtime is running, or the host is unreachable.
    pub fn install(&self) -> bool {
        let shared = &self.shared;
        if !shared.core().can_install() {
            tracing::warn!("Bridge already installed once; refusing to reinstall");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No tokio runtime available; bridge not installed");
            return false;
        };
        if !shared.backend.is_available() {
            tracing::warn!(backend = shared.backend.kind().as_str(), "Host unavailable; bridge not installed");
            return false;
        }

        let weak = Arc::downgrade(shared);
        let route: Weak<dyn Intercept> = weak.clone();
        let expire: Weak<dyn Expire> = weak.clone();

        // The engine leaves `Uninstalled` before any traffic can reach it.
        let handshake = shared.backend.handshake();
        let effects = {
            let mut core = shared.core();
            let timeout = core.config().timeout();
            core.start(Some(Timers::new(runtime.clone(), expire, timeout)), handshake)
        };
        shared.shim.apply(route);
        shared.backend.connect(InboundHandle {
            bridge: weak,
            runtime,
        });
        tracing::info!(backend = shared.backend.kind().as_str(), "Bridge installed");
        shared.dispatch(effects);
        true
    }

    /// Restores forwarding and rejects everything still pending.
    pub fn uninstall(&self) {
        let shared = &self.shared;
        if !shared.core().state().is_active() {
            return;
        }
        shared.shim.restore();
        shared.backend.disconnect();
        let effects = shared.core().teardown();
        tracing::info!(rejected = effects.len(), "Bridge uninstalled");
        shared.dispatch(effects);
    }

    /// Stand-in for the widget's send primitive.
    pub fn shim(&self) -> Arc<ChannelShim> {
        self.shared.shim.clone()
    }

    /// Convenience for `shim().send(message)`.
    pub fn send(&self, message: Value) -> Result<()> {
        self.shared.shim.send(message)
    }

    pub fn subscribe(&self, listener: WidgetListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.shared
            .listeners()
            .retain(|(existing, _)| *existing != id);
    }

    pub fn kind(&self) -> BackendKind {
        self.shared.backend.kind()
    }

    pub fn state(&self) -> BridgeState {
        self.shared.core().state()
    }

    pub fn render_context(&self) -> RenderContext {
        self.shared.core().context().clone()
    }

    /// Host answer to `ui/initialize`, once it arrived.
    pub fn host_info(&self) -> Option<InitializeResult> {
        self.shared.core().host().cloned()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.core().pending()
    }

    /// Issues an arbitrary host request through the ledger.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let effects = self
            .shared
            .core()
            .embedder_request(method.to_string(), params, tx);
        self.shared.dispatch(effects);
        rx.await
            .map_err(|_| BridgeError::Channel("request dropped".to_string()))?
    }
}

impl Drop for WidgetBridge {
    fn drop(&mut self) {
        self.uninstall();
    }
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, BridgeCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, WidgetListener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Widget(message) => self.emit(message),
                Effect::Push { requested_by } => {
                    let message = self.core().context().project(requested_by.as_deref());
                    self.emit(message);
                }
                Effect::Request { id, request } => self.backend.request(id, request),
                Effect::Notify(notification) => self.backend.notify(notification),
                Effect::Respond { id, outcome } => self.backend.respond(id, outcome),
                Effect::Forward(value) => {
                    if let Err(err) = self.shim.forward(&value) {
                        tracing::warn!(error = %err, "Forwarding widget message failed");
                    }
                }
            }
        }
    }

    fn emit(&self, message: LegacyMessage) {
        let listeners: Vec<WidgetListener> = self
            .listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        tracing::debug!(kind = %message.kind, listeners = listeners.len(), "Emitting widget message");
        let event = WidgetEvent {
            origin: self.origin.clone(),
            message,
        };
        for listener in listeners {
            listener(&event);
        }
    }
}

impl Intercept for Shared {
    fn intercept(&self, message: LegacyMessage) {
        let effects = self.core().outbound(message);
        self.dispatch(effects);
    }
}

impl Expire for Shared {
    fn expire(&self, id: RequestId) {
        let effects = self.core().expire(&id);
        self.dispatch(effects);
    }
}
