//! Bridge state machine.
//!
//! Every handler runs under the bridge lock, mutates state, and returns the
//! effects to perform. Effects are carried out by the caller after the lock
//! is released, so a host or widget that answers synchronously re-enters the
//! bridge without deadlocking.
//!
//! Render-context pushes are not rendered here. [`Effect::Push`] is turned
//! into a snapshot when it is dispatched, so a push delivered after a nested
//! re-entry still carries every update merged so far.

use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::config::{BridgeConfig, IntentHandling};
use crate::context::{ContextPatch, RenderContext};
use crate::envelope::{HostEnvelope, METHOD_NOT_FOUND, RequestId};
use crate::error::BridgeError;
use crate::handshake::{BridgeState, Handshake, InitializeResult};
use crate::ledger::{Completion, Ledger, PendingEntry, PendingKind};
use crate::legacy::{self, LegacyMessage};
use crate::tables::{
    self, HostNotification, HostRequest, Inbound, Outbound, intent_message_text,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    Widget(LegacyMessage),
    /// Render-context push, projected from the live context at dispatch.
    Push { requested_by: Option<String> },
    Request { id: RequestId, request: HostRequest },
    Notify(HostNotification),
    Respond {
        id: RequestId,
        outcome: Result<Value, Value>,
    },
    Forward(Value),
}

pub(crate) trait Expire: Send + Sync {
    fn expire(&self, id: RequestId);
}

/// Spawns one timeout task per ledger entry.
pub(crate) struct Timers {
    runtime: Handle,
    target: Weak<dyn Expire>,
    timeout: Duration,
}

impl Timers {
    pub(crate) fn new(runtime: Handle, target: Weak<dyn Expire>, timeout: Duration) -> Self {
        Self {
            runtime,
            target,
            timeout,
        }
    }

    fn spawn(&self, id: RequestId) -> AbortHandle {
        let target = self.target.clone();
        let timeout = self.timeout;
        self.runtime
            .spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(target) = target.upgrade() {
                    target.expire(id);
                }
            })
            .abort_handle()
    }
}

pub(crate) struct BridgeCore {
    state: BridgeState,
    installed_once: bool,
    config: BridgeConfig,
    intent_handling: IntentHandling,
    ledger: Ledger,
    context: RenderContext,
    host: Option<InitializeResult>,
    queued: VecDeque<LegacyMessage>,
    timers: Option<Timers>,
}

impl BridgeCore {
    pub(crate) fn new(config: BridgeConfig, intent_handling: IntentHandling) -> Self {
        Self {
            state: BridgeState::Uninstalled,
            installed_once: false,
            config,
            intent_handling,
            ledger: Ledger::new(),
            context: RenderContext::default(),
            host: None,
            queued: VecDeque::new(),
            timers: None,
        }
    }

    pub(crate) fn state(&self) -> BridgeState {
        self.state
    }

    pub(crate) fn context(&self) -> &RenderContext {
        &self.context
    }

    pub(crate) fn host(&self) -> Option<&InitializeResult> {
        self.host.as_ref()
    }

    pub(crate) fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn pending(&self) -> usize {
        self.ledger.len()
    }

    pub(crate) fn can_install(&self) -> bool {
        !self.installed_once
    }

    /// Marks the instance installed and opens the session.
    pub(crate) fn start(&mut self, timers: Option<Timers>, handshake: Handshake) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.installed_once = true;
        self.timers = timers;
        self.state = BridgeState::Installed;

        match handshake {
            Handshake::Negotiate => {
                let request = HostRequest::Initialize {
                    app_info: self.config.app_info.clone(),
                };
                let id = self.register(PendingEntry::new(
                    request.method(),
                    PendingKind::Handshake,
                ));
                self.state = BridgeState::AwaitingHandshake;
                tracing::debug!(%id, "Sent ui/initialize; awaiting host");
                effects.push(Effect::Request { id, request });
            }
            Handshake::Immediate(patch) => {
                self.context.merge(patch);
                self.become_ready(true, &mut effects);
            }
        }
        effects
    }

    /// Legacy message intercepted from the widget.
    pub(crate) fn outbound(&mut self, message: LegacyMessage) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            BridgeState::Ready => self.process_outbound(message, &mut effects),
            BridgeState::Installed | BridgeState::AwaitingHandshake => {
                if message.kind == legacy::UI_LIFECYCLE_IFRAME_READY {
                    tracing::debug!("Widget ready before handshake; ready push will follow");
                } else {
                    self.queued.push_back(message);
                }
            }
            BridgeState::Uninstalled => {
                effects.push(Effect::Forward(message.to_value()));
            }
        }
        effects
    }

    /// Raw value received from the host channel.
    pub(crate) fn inbound(&mut self, value: &Value) -> Vec<Effect> {
        let Some(envelope) = HostEnvelope::parse(value) else {
            tracing::debug!(%value, "Dropping inbound message without host envelope shape");
            return Vec::new();
        };
        if !self.state.is_active() {
            return Vec::new();
        }

        match envelope {
            HostEnvelope::Response { id, outcome } => self.complete(&id, outcome),
            HostEnvelope::Notification { method, params } => {
                let mut effects = Vec::new();
                match tables::translate_inbound(&method, params) {
                    Inbound::Context(patch) => self.merge_and_push(patch, &mut effects),
                    Inbound::ToolCancelled(params) => {
                        effects.push(Effect::Widget(lifecycle(
                            legacy::UI_LIFECYCLE_TOOL_CANCELLED,
                            params,
                        )));
                    }
                    Inbound::Teardown(params) => {
                        effects.push(Effect::Widget(lifecycle(
                            legacy::UI_LIFECYCLE_TEARDOWN,
                            params,
                        )));
                    }
                    Inbound::Unknown => {
                        tracing::debug!(%method, "Ignoring unknown host notification");
                    }
                }
                effects
            }
            HostEnvelope::Request { id, method, params } => {
                let mut effects = Vec::new();
                match tables::translate_inbound(&method, params) {
                    Inbound::Teardown(params) => {
                        effects.push(Effect::Widget(lifecycle(
                            legacy::UI_LIFECYCLE_TEARDOWN,
                            params,
                        )));
                        effects.push(Effect::Respond {
                            id,
                            outcome: Ok(json!({})),
                        });
                    }
                    Inbound::ToolCancelled(params) => {
                        effects.push(Effect::Widget(lifecycle(
                            legacy::UI_LIFECYCLE_TOOL_CANCELLED,
                            params,
                        )));
                        effects.push(Effect::Respond {
                            id,
                            outcome: Ok(json!({})),
                        });
                    }
                    Inbound::Context(patch) => {
                        self.merge_and_push(patch, &mut effects);
                        effects.push(Effect::Respond {
                            id,
                            outcome: Ok(json!({})),
                        });
                    }
                    Inbound::Unknown => {
                        tracing::debug!(%method, "Rejecting unknown host request");
                        effects.push(Effect::Respond {
                            id,
                            outcome: Err(HostEnvelope::error_object(
                                METHOD_NOT_FOUND,
                                &format!("Method not found: {method}"),
                            )),
                        });
                    }
                }
                effects
            }
        }
    }

    /// Host answer for a request the bridge issued.
    pub(crate) fn complete(&mut self, id: &RequestId, outcome: Result<Value, Value>) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.ledger.take(id) else {
            tracing::warn!(%id, "Host response without pending request");
            return effects;
        };

        match entry.kind {
            PendingKind::Handshake => {
                match outcome {
                    Ok(result) => {
                        let host = InitializeResult::from_value(&result);
                        self.context.merge(host.context_patch());
                        tracing::info!(
                            protocol_version = ?host.protocol_version,
                            "Host handshake completed"
                        );
                        self.host = Some(host);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "Host rejected ui/initialize; continuing without host context");
                    }
                }
                self.become_ready(true, &mut effects);
            }
            PendingKind::Widget { message_id } => {
                let (response, error) = match outcome {
                    Ok(result) => (Some(result), None),
                    Err(error) => (None, Some(error)),
                };
                effects.push(Effect::Widget(LegacyMessage::response(
                    &message_id,
                    response,
                    error,
                )));
            }
            PendingKind::Embedder { completion } => {
                let _ = completion.send(outcome.map_err(BridgeError::Upstream));
            }
        }
        effects
    }

    /// Timer fired for `id`; a no-op if the entry already settled.
    pub(crate) fn expire(&mut self, id: &RequestId) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.ledger.take(id) else {
            return effects;
        };
        tracing::warn!(%id, method = %entry.method, "Host request timed out");

        match entry.kind {
            PendingKind::Handshake => self.become_ready(false, &mut effects),
            PendingKind::Widget { message_id } => {
                effects.push(Effect::Widget(LegacyMessage::response(
                    &message_id,
                    None,
                    Some(BridgeError::Timeout.to_widget_value()),
                )));
            }
            PendingKind::Embedder { completion } => {
                let _ = completion.send(Err(BridgeError::Timeout));
            }
        }
        effects
    }

    /// Host-pushed state change (notification or capability globals).
    pub(crate) fn apply_context(&mut self, patch: ContextPatch) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state.is_active() {
            self.merge_and_push(patch, &mut effects);
        }
        effects
    }

    /// Request issued by the embedding application rather than the widget.
    pub(crate) fn embedder_request(
        &mut self,
        method: String,
        params: Value,
        completion: Completion,
    ) -> Vec<Effect> {
        if !self.state.is_active() {
            let _ = completion.send(Err(BridgeError::NotInstalled));
            return Vec::new();
        }
        let request = HostRequest::Raw { method, params };
        let id = self.register(PendingEntry::new(
            request.method(),
            PendingKind::Embedder { completion },
        ));
        vec![Effect::Request { id, request }]
    }

    /// Returns to `Uninstalled`, rejecting everything still pending.
    pub(crate) fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.state = BridgeState::Uninstalled;
        self.timers = None;
        if !self.queued.is_empty() {
            tracing::debug!(
                dropped = self.queued.len(),
                "Dropping widget messages queued behind the handshake"
            );
            self.queued.clear();
        }

        for (id, entry) in self.ledger.drain() {
            tracing::debug!(%id, method = %entry.method, "Rejecting pending request on uninstall");
            match entry.kind {
                PendingKind::Handshake => {}
                PendingKind::Widget { message_id } => {
                    effects.push(Effect::Widget(LegacyMessage::response(
                        &message_id,
                        None,
                        Some(BridgeError::Uninstalled.to_widget_value()),
                    )));
                }
                PendingKind::Embedder { completion } => {
                    let _ = completion.send(Err(BridgeError::Uninstalled));
                }
            }
        }
        effects
    }

    fn process_outbound(&mut self, message: LegacyMessage, effects: &mut Vec<Effect>) {
        let outbound = match tables::translate_outbound(&message) {
            Ok(outbound) => outbound,
            Err(err) => {
                let message_id = ensure_message_id(&message);
                tracing::debug!(kind = %message.kind, %message_id, error = %err, "Rejecting widget request");
                effects.push(Effect::Widget(LegacyMessage::received(&message_id)));
                effects.push(Effect::Widget(LegacyMessage::response(
                    &message_id,
                    None,
                    Some(err.to_widget_value()),
                )));
                return;
            }
        };

        match outbound {
            Outbound::Request(request) => self.widget_request(&message, request, effects),
            Outbound::Intent { intent, params } => match self.intent_handling {
                IntentHandling::Prompt => {
                    let request = HostRequest::SendMessage {
                        text: intent_message_text(&intent, &params),
                    };
                    self.widget_request(&message, request, effects);
                }
                IntentHandling::Ignore => {
                    let message_id = ensure_message_id(&message);
                    tracing::debug!(%intent, "Ignoring intent per configuration");
                    effects.push(Effect::Widget(LegacyMessage::received(&message_id)));
                    effects.push(Effect::Widget(LegacyMessage::response(
                        &message_id,
                        None,
                        None,
                    )));
                }
            },
            Outbound::Notification(notification) => effects.push(Effect::Notify(notification)),
            Outbound::RenderDataRequest => {
                effects.push(Effect::Push {
                    requested_by: message.message_id.clone(),
                });
            }
            Outbound::IframeReady => {
                effects.push(Effect::Push { requested_by: None });
                effects.push(Effect::Notify(HostNotification::Initialized));
            }
            Outbound::Unhandled => {
                tracing::debug!(kind = %message.kind, "No translation for widget message; forwarding");
                effects.push(Effect::Forward(message.to_value()));
            }
        }
    }

    fn widget_request(
        &mut self,
        message: &LegacyMessage,
        request: HostRequest,
        effects: &mut Vec<Effect>,
    ) {
        let message_id = ensure_message_id(message);
        effects.push(Effect::Widget(LegacyMessage::received(&message_id)));
        let id = self.register(PendingEntry::new(
            request.method(),
            PendingKind::Widget { message_id },
        ));
        effects.push(Effect::Request { id, request });
    }

    fn register(&mut self, entry: PendingEntry) -> RequestId {
        let id = self.ledger.allocate();
        self.ledger.insert(id.clone(), entry);
        if let Some(timers) = &self.timers {
            let timer = timers.spawn(id.clone());
            self.ledger.arm(&id, timer);
        }
        id
    }

    fn become_ready(&mut self, acknowledged: bool, effects: &mut Vec<Effect>) {
        self.state = BridgeState::Ready;
        effects.push(Effect::Push { requested_by: None });
        effects.push(Effect::Widget(LegacyMessage::new(
            legacy::UI_LIFECYCLE_IFRAME_READY,
        )));
        if acknowledged {
            effects.push(Effect::Notify(HostNotification::Initialized));
        }

        while let Some(message) = self.queued.pop_front() {
            self.process_outbound(message, effects);
        }
    }

    fn merge_and_push(&mut self, patch: ContextPatch, effects: &mut Vec<Effect>) {
        self.context.merge(patch);
        if self.state == BridgeState::Ready {
            effects.push(Effect::Push { requested_by: None });
        }
    }
}

fn ensure_message_id(message: &LegacyMessage) -> String {
    message
        .message_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn lifecycle(kind: &str, params: Option<Value>) -> LegacyMessage {
    let message = LegacyMessage::new(kind);
    match params {
        Some(params) if !params.is_null() => message.with_payload(params),
        _ => message,
    }
}
