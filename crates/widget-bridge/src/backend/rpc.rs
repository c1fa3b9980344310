//! Message-passing backend: JSON-RPC envelopes over a shared channel.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use super::{BackendKind, HostBackend};
use crate::bridge::InboundHandle;
use crate::envelope::{HostEnvelope, RequestId};
use crate::error::Result;
use crate::handshake::Handshake;
use crate::shim::OutboundSink;
use crate::tables::{HostNotification, HostRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type InboundListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Upstream channel shared with the host.
pub trait HostChannel: Send + Sync {
    fn post(&self, message: &Value) -> Result<()>;

    fn is_open(&self) -> bool {
        true
    }

    fn subscribe(&self, listener: InboundListener) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);
}

pub struct RpcBackend {
    channel: Option<Arc<dyn HostChannel>>,
    session: Mutex<Option<Session>>,
}

struct Session {
    inbound: InboundHandle,
    listener: ListenerId,
}

impl RpcBackend {
    pub fn new(channel: Option<Arc<dyn HostChannel>>) -> Self {
        Self {
            channel,
            session: Mutex::new(None),
        }
    }

    fn inbound(&self) -> Option<InboundHandle> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|session| session.inbound.clone())
    }

    fn send_json(&self, value: &Value) -> Result<()> {
        match &self.channel {
            Some(channel) => {
                tracing::trace!(direction = "out", raw = %value, "host frame");
                channel.post(value)
            }
            None => Err(crate::error::BridgeError::Channel(
                "no upstream channel".to_string(),
            )),
        }
    }
}

impl OutboundSink for RpcBackend {
    fn post(&self, message: &Value) -> Result<()> {
        self.send_json(message)
    }
}

impl HostBackend for RpcBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MessagePassing
    }

    fn is_available(&self) -> bool {
        self.channel.as_ref().is_some_and(|channel| channel.is_open())
    }

    fn connect(&self, inbound: InboundHandle) {
        let Some(channel) = &self.channel else {
            return;
        };
        let deliver_to = inbound.clone();
        let listener = channel.subscribe(Arc::new(move |value: &Value| {
            tracing::trace!(direction = "in", raw = %value, "host frame");
            deliver_to.deliver(value);
        }));
        let previous = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(Session { inbound, listener });
        if let Some(previous) = previous {
            channel.unsubscribe(previous.listener);
        }
    }

    fn disconnect(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let (Some(channel), Some(session)) = (&self.channel, session) {
            channel.unsubscribe(session.listener);
        }
    }

    fn handshake(&self) -> Handshake {
        Handshake::Negotiate
    }

    fn request(&self, id: RequestId, request: HostRequest) {
        let envelope = HostEnvelope::request(&id, request.method(), request.params());
        if let Err(err) = self.send_json(&envelope) {
            tracing::warn!(%id, method = request.method(), error = %err, "Host request send failed");
            if let Some(inbound) = self.inbound() {
                inbound.complete(id, Err(json!({ "message": err.to_string() })));
            }
        }
    }

    fn notify(&self, notification: HostNotification) {
        let envelope = HostEnvelope::notification(notification.method(), notification.params());
        if let Err(err) = self.send_json(&envelope) {
            tracing::warn!(method = notification.method(), error = %err, "Host notification send failed");
        }
    }

    fn respond(&self, id: RequestId, outcome: std::result::Result<Value, Value>) {
        let envelope = match outcome {
            Ok(result) => HostEnvelope::result(&id, result),
            Err(error) => HostEnvelope::error(&id, error),
        };
        if let Err(err) = self.send_json(&envelope) {
            tracing::warn!(%id, error = %err, "Host response send failed");
        }
    }
}
