//! Interception of the widget's outbound send primitive.

use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::error::Result;
use crate::legacy::LegacyMessage;

/// The widget's original send primitive.
pub trait OutboundSink: Send + Sync {
    fn post(&self, message: &Value) -> Result<()>;
}

/// Receiver of intercepted legacy messages.
pub(crate) trait Intercept: Send + Sync {
    fn intercept(&self, message: LegacyMessage);
}

/// Stands in for the send primitive while a bridge is installed.
///
/// Legacy messages go to the bridge; everything else, and everything sent
/// while no bridge is applied, reaches the original primitive unchanged.
pub struct ChannelShim {
    original: Option<Arc<dyn OutboundSink>>,
    route: RwLock<Option<Weak<dyn Intercept>>>,
}

impl ChannelShim {
    pub fn new(original: Option<Arc<dyn OutboundSink>>) -> Self {
        Self {
            original,
            route: RwLock::new(None),
        }
    }

    pub fn send(&self, message: Value) -> Result<()> {
        if let Some(route) = self.active_route() {
            if let Some(legacy) = LegacyMessage::from_value(&message) {
                route.intercept(legacy);
                return Ok(());
            }
        }
        self.forward(&message)
    }

    /// Hands a message to the original primitive.
    pub fn forward(&self, message: &Value) -> Result<()> {
        match &self.original {
            Some(original) => original.post(message),
            None => {
                tracing::debug!(%message, "No original send primitive; dropping message");
                Ok(())
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        self.active_route().is_some()
    }

    pub(crate) fn apply(&self, route: Weak<dyn Intercept>) {
        *self.route.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(route);
    }

    pub(crate) fn restore(&self) {
        *self.route.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    fn active_route(&self) -> Option<Arc<dyn Intercept>> {
        self.route
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }
}
