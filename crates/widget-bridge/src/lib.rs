//! Bridge that lets widgets written against the legacy tagged-message
//! protocol run inside hosts speaking the JSON-RPC apps protocol.
//!
//! The crate exposes a small surface:
//! - [`WidgetBridge`]: install/uninstall lifecycle, widget observers and
//!   embedder requests
//! - [`ChannelShim`]: stand-in for the widget's send primitive
//! - two host backends selected through [`BackendSelection`]

pub mod backend;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod context;
mod engine;
pub mod envelope;
pub mod error;
pub mod handshake;
mod ledger;
pub mod legacy;
pub mod shim;
pub mod tables;

pub use backend::{
    BackendKind, BackendSelection, CAPABILITY_OBJECT_MIME_TYPE, GlobalsListener, HostBackend,
    HostCapabilities, HostChannel, InboundListener, ListenerId, MESSAGE_PASSING_MIME_TYPE,
};
pub use bridge::{InboundHandle, WidgetBridge, WidgetEvent, WidgetListener};
pub use channel::{LineChannel, MemoryChannel};
pub use config::{AppInfo, BridgeConfig, CapabilityConfig, IntentHandling, PROTOCOL_VERSION};
pub use context::{ContextPatch, RenderContext};
pub use envelope::{HostEnvelope, RequestId};
pub use error::{BridgeError, Result};
pub use handshake::{BridgeState, InitializeResult};
pub use legacy::LegacyMessage;
pub use shim::{ChannelShim, OutboundSink};
