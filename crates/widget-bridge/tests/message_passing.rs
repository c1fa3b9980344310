use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use widget_bridge::legacy::{self, LegacyMessage};
use widget_bridge::{
    BackendSelection, BridgeConfig, BridgeError, BridgeState, ChannelShim, HostChannel,
    InboundListener, LineChannel, ListenerId, MemoryChannel, WidgetBridge, WidgetEvent,
};

const TIMEOUT_MS: u64 = 50;

struct Harness {
    bridge: WidgetBridge,
    channel: Arc<MemoryChannel>,
    outbox: mpsc::UnboundedReceiver<Value>,
    widget: Arc<Mutex<Vec<LegacyMessage>>>,
}

impl Harness {
    fn new() -> Self {
        let (channel, outbox) = MemoryChannel::new();
        let upstream: Arc<dyn HostChannel> = channel.clone();
        let bridge = WidgetBridge::new(
            BackendSelection::MessagePassing {
                channel: Some(upstream),
            },
            BridgeConfig::default().with_timeout(Duration::from_millis(TIMEOUT_MS)),
        );
        let widget = Arc::new(Mutex::new(Vec::new()));
        let sink = widget.clone();
        bridge.subscribe(Arc::new(move |event: &WidgetEvent| {
            sink.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(event.message.clone());
        }));
        Self {
            bridge,
            channel,
            outbox,
            widget,
        }
    }

    /// Installed bridge whose handshake has already been answered.
    fn ready(host_context: Value) -> anyhow::Result<Self> {
        let mut harness = Self::new();
        anyhow::ensure!(harness.bridge.install(), "install failed");
        let initialize = harness.sent();
        anyhow::ensure!(initialize.len() == 1, "expected one initialize frame");
        harness.host(json!({
            "jsonrpc": "2.0",
            "id": initialize[0]["id"].clone(),
            "result": { "protocolVersion": "2025-11-21", "hostContext": host_context }
        }));
        harness.sent();
        harness.received();
        Ok(harness)
    }

    fn host(&self, value: Value) {
        self.channel.deliver(&value);
    }

    fn widget_send(&self, value: Value) -> anyhow::Result<()> {
        self.bridge.send(value)?;
        Ok(())
    }

    /// Frames posted upstream since the last call.
    fn sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbox.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Synthetic widget messages since the last call.
    fn received(&self) -> Vec<LegacyMessage> {
        std::mem::take(
            &mut *self
                .widget
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

fn kinds(messages: &[LegacyMessage]) -> Vec<&str> {
    messages.iter().map(|message| message.kind.as_str()).collect()
}

fn render_data(message: &LegacyMessage) -> Value {
    message
        .payload
        .as_ref()
        .and_then(|payload| payload.get("renderData"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Host that answers from inside `post`, re-entering the bridge before the
/// call that posted has returned.
#[derive(Default)]
struct SyncHost {
    listeners: Mutex<Vec<InboundListener>>,
    posted: Mutex<Vec<Value>>,
    /// Widget primitive used to send a prompt while the bridge subscribes.
    early_widget: OnceLock<Weak<ChannelShim>>,
}

impl SyncHost {
    fn answer(&self, value: &Value) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener(value);
        }
    }

    fn posted(&self) -> Vec<Value> {
        self.posted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl HostChannel for SyncHost {
    fn post(&self, message: &Value) -> widget_bridge::Result<()> {
        self.posted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        match message["method"].as_str() {
            Some("ui/initialize") => self.answer(&json!({
                "jsonrpc": "2.0",
                "id": message["id"].clone(),
                "result": { "hostContext": { "theme": "light" } }
            })),
            Some("ui/notifications/initialized") => self.answer(&json!({
                "jsonrpc": "2.0",
                "method": "ui/notifications/tool-input",
                "params": { "arguments": { "city": "Oslo" } }
            })),
            _ => {}
        }
        Ok(())
    }

    fn subscribe(&self, listener: InboundListener) -> ListenerId {
        let id = {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.push(listener);
            ListenerId(listeners.len() as u64)
        };
        if let Some(shim) = self.early_widget.get().and_then(Weak::upgrade) {
            let _ = shim.send(json!({
                "type": "prompt",
                "messageId": "early",
                "payload": { "prompt": "hi" }
            }));
        }
        id
    }

    fn unsubscribe(&self, _id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

fn sync_bridge(host: &Arc<SyncHost>) -> (WidgetBridge, Arc<Mutex<Vec<LegacyMessage>>>) {
    let upstream: Arc<dyn HostChannel> = host.clone();
    let bridge = WidgetBridge::new(
        BackendSelection::MessagePassing {
            channel: Some(upstream),
        },
        BridgeConfig::default(),
    );
    let widget = Arc::new(Mutex::new(Vec::new()));
    let sink = widget.clone();
    bridge.subscribe(Arc::new(move |event: &WidgetEvent| {
        sink.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.message.clone());
    }));
    (bridge, widget)
}

async fn advance_past_timeout() {
    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS + 1)).await;
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn install_without_reachable_upstream_fails_cleanly() -> anyhow::Result<()> {
    let missing = WidgetBridge::new(
        BackendSelection::MessagePassing { channel: None },
        BridgeConfig::default(),
    );
    assert!(!missing.install());
    assert_eq!(missing.state(), BridgeState::Uninstalled);

    let mut harness = Harness::new();
    harness.channel.close();
    assert!(!harness.bridge.install());
    assert_eq!(harness.channel.listener_count(), 0);
    assert!(harness.sent().is_empty());
    assert!(!harness.bridge.shim().is_applied());
    Ok(())
}

#[test]
fn install_requires_a_tokio_runtime() {
    let harness = Harness::new();
    assert!(!harness.bridge.install());
    assert_eq!(harness.channel.listener_count(), 0);
}

#[tokio::test]
async fn handshake_seeds_context_and_announces_ready() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    assert!(harness.bridge.install());
    assert_eq!(harness.bridge.state(), BridgeState::AwaitingHandshake);
    assert_eq!(harness.channel.listener_count(), 1);

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "ui/initialize");
    assert_eq!(sent[0]["params"]["protocolVersion"], "2025-11-21");
    assert_eq!(sent[0]["params"]["appCapabilities"], json!({}));
    assert_eq!(sent[0]["params"]["appInfo"]["name"], "widget-bridge");
    assert!(harness.received().is_empty());

    harness.host(json!({
        "jsonrpc": "2.0",
        "id": sent[0]["id"].clone(),
        "result": {
            "protocolVersion": "2025-11-21",
            "hostInfo": { "name": "host", "version": "2.0.0" },
            "hostCapabilities": { "openLinks": {} },
            "hostContext": { "theme": "dark", "locale": "de-DE", "viewport": { "maxHeight": 480 } }
        }
    }));

    assert_eq!(harness.bridge.state(), BridgeState::Ready);
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "ui/notifications/initialized");
    assert!(sent[0].get("id").is_none());

    let received = harness.received();
    assert_eq!(
        kinds(&received),
        vec![
            legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA,
            legacy::UI_LIFECYCLE_IFRAME_READY
        ]
    );
    let context = render_data(&received[0]);
    assert_eq!(context["theme"], "dark");
    assert_eq!(context["locale"], "de-DE");
    assert_eq!(context["maxHeight"], json!(480.0));

    let host = harness.bridge.host_info().unwrap_or_default();
    assert_eq!(host.host_info, Some(json!({ "name": "host", "version": "2.0.0" })));
    assert_eq!(host.protocol_version.as_deref(), Some("2025-11-21"));
    Ok(())
}

#[tokio::test]
async fn tool_request_is_acknowledged_then_answered() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;

    harness.widget_send(json!({
        "type": "tool",
        "messageId": "m1",
        "payload": { "toolName": "t", "params": {} }
    }))?;

    let received = harness.received();
    assert_eq!(
        received,
        vec![LegacyMessage::received("m1")]
    );
    assert_eq!(
        received[0].to_value(),
        json!({ "type": "ui-message-received", "messageId": "m1", "payload": { "messageId": "m1" } })
    );

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "tools/call");
    assert_eq!(sent[0]["params"], json!({ "name": "t", "arguments": {} }));
    assert_eq!(harness.bridge.pending_requests(), 1);

    let id = sent[0]["id"].clone();
    harness.host(json!({ "jsonrpc": "2.0", "id": id, "result": { "ok": true } }));
    assert_eq!(
        harness
            .received()
            .iter()
            .map(LegacyMessage::to_value)
            .collect::<Vec<_>>(),
        vec![json!({
            "type": "ui-message-response",
            "messageId": "m1",
            "payload": { "messageId": "m1", "response": { "ok": true } }
        })]
    );
    assert_eq!(harness.bridge.pending_requests(), 0);

    harness.host(json!({ "jsonrpc": "2.0", "id": id, "result": { "ok": false } }));
    assert!(harness.received().is_empty());
    Ok(())
}

#[tokio::test]
async fn host_errors_reach_the_widget_verbatim() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({
        "type": "link",
        "messageId": "l1",
        "payload": { "url": "https://example.com" }
    }))?;
    let sent = harness.sent();
    assert_eq!(sent[0]["method"], "ui/open-link");
    assert_eq!(sent[0]["params"], json!({ "url": "https://example.com" }));
    harness.received();

    let error = json!({ "code": -32000, "message": "blocked" });
    harness.host(json!({ "jsonrpc": "2.0", "id": sent[0]["id"].clone(), "error": error }));
    assert_eq!(
        harness.received(),
        vec![LegacyMessage::response("l1", None, Some(error))]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_exactly_once() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({
        "type": "prompt",
        "messageId": "p1",
        "payload": { "prompt": "hello" }
    }))?;
    let sent = harness.sent();
    assert_eq!(sent[0]["method"], "ui/message");
    assert_eq!(
        sent[0]["params"],
        json!({ "role": "user", "content": [{ "type": "text", "text": "hello" }] })
    );
    harness.received();

    advance_past_timeout().await;
    assert_eq!(
        harness.received(),
        vec![LegacyMessage::response("p1", None, Some(json!("Timeout")))]
    );
    assert_eq!(harness.bridge.pending_requests(), 0);

    harness.host(json!({ "jsonrpc": "2.0", "id": sent[0]["id"].clone(), "result": {} }));
    advance_past_timeout().await;
    assert!(harness.received().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_still_announces_ready_once() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    assert!(harness.bridge.install());
    let initialize = harness.sent();

    advance_past_timeout().await;
    assert_eq!(harness.bridge.state(), BridgeState::Ready);
    assert_eq!(
        kinds(&harness.received()),
        vec![
            legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA,
            legacy::UI_LIFECYCLE_IFRAME_READY
        ]
    );
    assert!(harness.sent().is_empty());

    harness.host(json!({
        "jsonrpc": "2.0",
        "id": initialize[0]["id"].clone(),
        "result": { "hostContext": { "theme": "dark" } }
    }));
    assert!(harness.received().is_empty());
    assert!(harness.sent().is_empty());
    assert_eq!(harness.bridge.render_context().theme, None);
    Ok(())
}

#[tokio::test]
async fn handshake_error_continues_without_host_context() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    assert!(harness.bridge.install());
    let initialize = harness.sent();
    harness.host(json!({
        "jsonrpc": "2.0",
        "id": initialize[0]["id"].clone(),
        "error": { "code": -32601, "message": "Method not found" }
    }));

    assert_eq!(harness.bridge.state(), BridgeState::Ready);
    assert_eq!(harness.sent()[0]["method"], "ui/notifications/initialized");
    assert!(harness.bridge.host_info().is_none());
    assert_eq!(
        kinds(&harness.received()),
        vec![
            legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA,
            legacy::UI_LIFECYCLE_IFRAME_READY
        ]
    );
    Ok(())
}

#[tokio::test]
async fn widget_traffic_waits_for_the_handshake() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    assert!(harness.bridge.install());
    let initialize = harness.sent();

    harness.widget_send(json!({ "type": "prompt", "messageId": "p1", "payload": { "prompt": "first" } }))?;
    harness.widget_send(json!({ "type": "ui-lifecycle-iframe-ready" }))?;
    harness.widget_send(json!({
        "type": "tool",
        "messageId": "m1",
        "payload": { "toolName": "second", "params": { "n": 2 } }
    }))?;
    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/tool-input",
        "params": { "arguments": { "city": "Oslo" } }
    }));
    assert!(harness.sent().is_empty());
    assert!(harness.received().is_empty());

    harness.host(json!({ "jsonrpc": "2.0", "id": initialize[0]["id"].clone(), "result": {} }));

    let received = harness.received();
    assert_eq!(
        kinds(&received),
        vec![
            legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA,
            legacy::UI_LIFECYCLE_IFRAME_READY,
            legacy::UI_MESSAGE_RECEIVED,
            legacy::UI_MESSAGE_RECEIVED,
        ]
    );
    assert_eq!(render_data(&received[0])["toolInput"], json!({ "city": "Oslo" }));
    assert_eq!(received[2].message_id.as_deref(), Some("p1"));
    assert_eq!(received[3].message_id.as_deref(), Some("m1"));

    let methods: Vec<_> = harness
        .sent()
        .iter()
        .map(|frame| frame["method"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        methods,
        vec!["ui/notifications/initialized", "ui/message", "tools/call"]
    );
    Ok(())
}

#[tokio::test]
async fn context_updates_merge_into_full_pushes() -> anyhow::Result<()> {
    let harness = Harness::ready(json!({ "locale": "en-US", "theme": "light" }))?;

    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/tool-input",
        "params": { "arguments": { "query": "weather" } }
    }));
    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/tool-result",
        "params": { "content": [], "structuredContent": { "temp": 21 } }
    }));
    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/host-context-changed",
        "params": { "theme": "dark" }
    }));
    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/size-changed",
        "params": { "height": 300 }
    }));

    let pushes = harness.received();
    assert_eq!(pushes.len(), 4);
    assert!(
        pushes
            .iter()
            .all(|push| push.kind == legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA)
    );

    let after_theme = render_data(&pushes[2]);
    assert_eq!(after_theme["theme"], "dark");
    assert_eq!(after_theme["locale"], "en-US");
    assert_eq!(after_theme["toolInput"], json!({ "query": "weather" }));
    assert_eq!(after_theme["toolOutput"], json!({ "temp": 21 }));

    let last = render_data(&pushes[3]);
    assert_eq!(last["maxHeight"], json!(300.0));
    assert_eq!(last["theme"], "dark");
    Ok(())
}

#[tokio::test]
async fn render_data_request_is_answered_locally() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({ "theme": "dark" }))?;
    harness.widget_send(json!({ "type": "ui-request-render-data", "messageId": "r1" }))?;

    let received = harness.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA);
    assert_eq!(received[0].message_id.as_deref(), Some("r1"));
    assert_eq!(render_data(&received[0])["theme"], "dark");
    assert!(harness.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn late_iframe_ready_repeats_initialized_only() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({ "type": "ui-lifecycle-iframe-ready" }))?;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "ui/notifications/initialized");
    assert_eq!(
        kinds(&harness.received()),
        vec![legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA]
    );
    Ok(())
}

#[tokio::test]
async fn notifications_are_fire_and_forget() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({ "type": "ui-size-change", "payload": { "width": 200, "height": 120 } }))?;
    harness.widget_send(json!({ "type": "notify", "payload": { "message": "saved" } }))?;

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["method"], "ui/notifications/size-changed");
    assert_eq!(sent[0]["params"], json!({ "width": 200.0, "height": 120.0 }));
    assert_eq!(sent[1]["method"], "notifications/message");
    assert_eq!(sent[1]["params"], json!({ "level": "info", "data": "saved" }));
    assert!(sent.iter().all(|frame| frame.get("id").is_none()));
    assert!(harness.received().is_empty());
    assert_eq!(harness.bridge.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_request_payload_is_rejected_without_host_call() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({ "type": "tool", "messageId": "bad", "payload": { "params": {} } }))?;

    let received = harness.received();
    assert_eq!(
        kinds(&received),
        vec![legacy::UI_MESSAGE_RECEIVED, legacy::UI_MESSAGE_RESPONSE]
    );
    let error = received[1]
        .payload
        .as_ref()
        .and_then(|payload| payload["error"].as_str())
        .unwrap_or_default();
    assert!(error.starts_with("invalid payload"), "{error}");
    assert!(harness.sent().is_empty());
    assert_eq!(harness.bridge.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn teardown_request_is_relayed_and_acknowledged() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.host(json!({
        "jsonrpc": "2.0",
        "id": "teardown-7",
        "method": "ui/resource-teardown",
        "params": { "reason": "closed" }
    }));

    assert_eq!(
        harness.received(),
        vec![LegacyMessage::new(legacy::UI_LIFECYCLE_TEARDOWN).with_payload(json!({ "reason": "closed" }))]
    );
    assert_eq!(
        harness.sent(),
        vec![json!({ "jsonrpc": "2.0", "id": "teardown-7", "result": {} })]
    );
    Ok(())
}

#[tokio::test]
async fn tool_cancellation_reaches_the_widget() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.host(json!({
        "jsonrpc": "2.0",
        "method": "ui/notifications/tool-cancelled",
        "params": { "reason": "user" }
    }));
    assert_eq!(
        harness.received(),
        vec![LegacyMessage::new(legacy::UI_LIFECYCLE_TOOL_CANCELLED).with_payload(json!({ "reason": "user" }))]
    );
    assert!(harness.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_host_traffic_is_handled_quietly() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.host(json!({ "jsonrpc": "2.0", "id": 41, "method": "ui/unknown-request" }));
    harness.host(json!({ "jsonrpc": "2.0", "method": "ui/notifications/unknown" }));
    harness.host(json!({ "type": "not-an-envelope" }));
    harness.host(json!({ "jsonrpc": "2.0", "id": 999, "result": {} }));

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], 41);
    assert_eq!(sent[0]["error"]["code"], -32601);
    assert!(harness.received().is_empty());
    Ok(())
}

#[tokio::test]
async fn foreign_widget_traffic_is_forwarded_unchanged() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    let analytics = json!({ "type": "analytics", "event": "click" });
    let custom = json!({ "type": "ui-custom-extension", "payload": { "a": 1 } });
    harness.widget_send(analytics.clone())?;
    harness.widget_send(custom.clone())?;

    assert_eq!(harness.sent(), vec![analytics, custom]);
    assert!(harness.received().is_empty());
    Ok(())
}

#[tokio::test]
async fn uninstall_rejects_pending_and_restores_forwarding() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    harness.widget_send(json!({ "type": "tool", "messageId": "m1", "payload": { "toolName": "slow" } }))?;
    let sent = harness.sent();
    harness.received();

    harness.bridge.uninstall();
    assert_eq!(harness.bridge.state(), BridgeState::Uninstalled);
    assert_eq!(harness.bridge.pending_requests(), 0);
    assert_eq!(harness.channel.listener_count(), 0);
    assert!(!harness.bridge.shim().is_applied());
    assert_eq!(
        harness.received(),
        vec![LegacyMessage::response("m1", None, Some(json!("adapter uninstalled")))]
    );

    harness.host(json!({ "jsonrpc": "2.0", "id": sent[0]["id"].clone(), "result": {} }));
    assert!(harness.received().is_empty());

    let raw = json!({ "type": "tool", "messageId": "m2", "payload": { "toolName": "t" } });
    harness.widget_send(raw.clone())?;
    assert_eq!(harness.sent(), vec![raw]);

    assert!(!harness.bridge.install());
    Ok(())
}

#[tokio::test]
async fn embedder_requests_share_the_ledger() -> anyhow::Result<()> {
    let mut harness = Harness::ready(json!({}))?;
    let Harness {
        bridge,
        channel,
        outbox,
        ..
    } = &mut harness;

    let (result, ()) = tokio::join!(bridge.request("custom/ping", json!({ "n": 1 })), async {
        if let Some(frame) = outbox.recv().await {
            assert_eq!(frame["method"], "custom/ping");
            assert_eq!(frame["params"], json!({ "n": 1 }));
            channel.deliver(&json!({ "jsonrpc": "2.0", "id": frame["id"].clone(), "result": { "pong": true } }));
        }
    });
    assert_eq!(result?, json!({ "pong": true }));

    let (result, ()) = tokio::join!(bridge.request("custom/fail", json!({})), async {
        if let Some(frame) = outbox.recv().await {
            channel.deliver(&json!({
                "jsonrpc": "2.0",
                "id": frame["id"].clone(),
                "error": { "code": 1, "message": "nope" }
            }));
        }
    });
    assert!(matches!(result, Err(BridgeError::Upstream(error)) if error["message"] == "nope"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn embedder_request_times_out() -> anyhow::Result<()> {
    let harness = Harness::ready(json!({}))?;
    let result = harness.bridge.request("custom/slow", json!({})).await;
    assert!(matches!(result, Err(BridgeError::Timeout)));
    assert_eq!(harness.bridge.pending_requests(), 0);

    harness.bridge.uninstall();
    let result = harness.bridge.request("custom/after", json!({})).await;
    assert!(matches!(result, Err(BridgeError::NotInstalled)));
    Ok(())
}

#[tokio::test]
async fn line_channel_carries_a_full_session() -> anyhow::Result<()> {
    let (bridge_stream, host_stream) = tokio::io::duplex(16 * 1024);
    let (bridge_read, bridge_write) = tokio::io::split(bridge_stream);
    let (host_read, mut host_write) = tokio::io::split(host_stream);
    let channel: Arc<dyn HostChannel> =
        Arc::new(LineChannel::spawn(Box::new(bridge_read), Box::new(bridge_write)));

    let bridge = WidgetBridge::new(
        BackendSelection::MessagePassing {
            channel: Some(channel),
        },
        BridgeConfig::default(),
    );
    let (widget_tx, mut widget_rx) = mpsc::unbounded_channel();
    bridge.subscribe(Arc::new(move |event: &WidgetEvent| {
        let _ = widget_tx.send(event.message.clone());
    }));
    assert!(bridge.install());

    let mut host_lines = BufReader::new(host_read).lines();
    let wait = Duration::from_secs(1);

    let line = tokio::time::timeout(wait, host_lines.next_line())
        .await??
        .unwrap_or_default();
    let initialize: Value = serde_json::from_str(&line)?;
    assert_eq!(initialize["method"], "ui/initialize");

    let response = json!({
        "jsonrpc": "2.0",
        "id": initialize["id"].clone(),
        "result": { "hostContext": { "theme": "dark" } }
    });
    host_write
        .write_all(format!("{}\n", serde_json::to_string(&response)?).as_bytes())
        .await?;
    host_write.flush().await?;

    let line = tokio::time::timeout(wait, host_lines.next_line())
        .await??
        .unwrap_or_default();
    let initialized: Value = serde_json::from_str(&line)?;
    assert_eq!(initialized["method"], "ui/notifications/initialized");

    let push = tokio::time::timeout(wait, widget_rx.recv()).await?;
    assert_eq!(
        push.as_ref().map(|message| render_data(message)["theme"].clone()),
        Some(json!("dark"))
    );
    let ready = tokio::time::timeout(wait, widget_rx.recv()).await?;
    assert_eq!(
        ready.map(|message| message.kind),
        Some(legacy::UI_LIFECYCLE_IFRAME_READY.to_string())
    );

    bridge.send(json!({ "type": "prompt", "messageId": "p1", "payload": { "prompt": "hi" } }))?;
    let line = tokio::time::timeout(wait, host_lines.next_line())
        .await??
        .unwrap_or_default();
    let prompt: Value = serde_json::from_str(&line)?;
    assert_eq!(prompt["method"], "ui/message");

    let response = json!({ "jsonrpc": "2.0", "id": prompt["id"].clone(), "result": {} });
    host_write
        .write_all(format!("{}\n", serde_json::to_string(&response)?).as_bytes())
        .await?;
    host_write.flush().await?;

    let ack = tokio::time::timeout(wait, widget_rx.recv()).await?;
    assert_eq!(ack, Some(LegacyMessage::received("p1")));
    let answer = tokio::time::timeout(wait, widget_rx.recv()).await?;
    assert_eq!(answer, Some(LegacyMessage::response("p1", Some(json!({})), None)));
    Ok(())
}

#[tokio::test]
async fn synchronous_host_never_leaves_a_stale_push() -> anyhow::Result<()> {
    let host = Arc::new(SyncHost::default());
    let (bridge, widget) = sync_bridge(&host);
    assert!(bridge.install());
    assert_eq!(bridge.state(), BridgeState::Ready);

    let received = widget
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    let pushes: Vec<Value> = received
        .iter()
        .filter(|message| message.kind == legacy::UI_LIFECYCLE_IFRAME_RENDER_DATA)
        .map(render_data)
        .collect();
    let Some(last) = pushes.last() else {
        anyhow::bail!("no render data reached the widget");
    };
    assert_eq!(*last, serde_json::to_value(bridge.render_context())?);
    assert_eq!(last["toolInput"], json!({ "city": "Oslo" }));
    assert_eq!(last["theme"], "light");
    Ok(())
}

#[tokio::test]
async fn widget_traffic_during_install_is_translated() -> anyhow::Result<()> {
    let host = Arc::new(SyncHost::default());
    let (bridge, widget) = sync_bridge(&host);
    let _ = host.early_widget.set(Arc::downgrade(&bridge.shim()));
    assert!(bridge.install());

    let posted = host.posted();
    assert!(posted.iter().all(|frame| frame.get("type").is_none()));
    let methods: Vec<_> = posted
        .iter()
        .filter_map(|frame| frame["method"].as_str())
        .collect();
    assert_eq!(
        methods,
        vec!["ui/initialize", "ui/notifications/initialized", "ui/message"]
    );
    assert_eq!(bridge.pending_requests(), 1);

    let received = widget
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    assert!(received.contains(&LegacyMessage::received("early")));
    Ok(())
}
