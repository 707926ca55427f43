//! Client dispatch tests against a scripted in-memory transport: handshake,
//! response correlation, server-initiated requests and notifications.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use td_client::{Client, NotifyHandler, SamplingHandler};
use td_protocol::{
    Content, CreateMessageRequest, CreateMessageResult, Implementation, Role,
    ToolListChangedNotification,
};
use td_transport::{ClientReceiver, ClientTransport};
use td_types::Result;
use tokio_util::sync::CancellationToken;

/// In-memory transport that answers initialize/ping like a server and keeps
/// everything the client sends.
struct ScriptedTransport {
    receiver: RwLock<Option<Arc<dyn ClientReceiver>>>,
    sent: Mutex<Vec<serde_json::Value>>,
    protocol_version: String,
}

impl ScriptedTransport {
    fn new(protocol_version: &str) -> Self {
        Self {
            receiver: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            protocol_version: protocol_version.to_string(),
        }
    }

    fn sent_frames(&self) -> Vec<serde_json::Value> {
        self.sent.lock().clone()
    }

    /// Push a frame into the client as if the server had sent it.
    async fn inject(&self, frame: serde_json::Value) {
        let receiver = self.receiver.read().clone().expect("receiver installed");
        receiver
            .receive(serde_json::to_vec(&frame).unwrap().as_slice())
            .await
            .unwrap();
    }
}

#[async_trait]
impl ClientTransport for ScriptedTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, msg: Vec<u8>) -> Result<()> {
        let frame: serde_json::Value = serde_json::from_slice(&msg).unwrap();
        self.sent.lock().push(frame.clone());

        // answer the client's own requests the way a live server would
        if let (Some(id), Some(method)) = (frame.get("id"), frame.get("method")) {
            let result = match method.as_str().unwrap_or_default() {
                "initialize" => serde_json::json!({
                    "serverInfo": {"name": "scripted", "version": "1"},
                    "capabilities": {"tools": {"listChanged": true}},
                    "protocolVersion": self.protocol_version,
                    "instructions": "be gentle"
                }),
                "ping" => serde_json::json!({}),
                _ => return Ok(()),
            };
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": result,
            });
            let receiver = self.receiver.read().clone().expect("receiver installed");
            let bytes = serde_json::to_vec(&response).unwrap();
            tokio::spawn(async move {
                let _ = receiver.receive(&bytes).await;
            });
        }
        Ok(())
    }

    fn set_receiver(&self, receiver: Arc<dyn ClientReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct RecordingNotifyHandler {
    tools_changed: Mutex<usize>,
}

#[async_trait]
impl NotifyHandler for RecordingNotifyHandler {
    async fn tools_list_changed(&self, _notify: ToolListChangedNotification) -> Result<()> {
        *self.tools_changed.lock() += 1;
        Ok(())
    }
}

struct SlowSampler {
    saw_cancel: Mutex<bool>,
}

#[async_trait]
impl SamplingHandler for SlowSampler {
    async fn create_message(
        &self,
        cancel: CancellationToken,
        _request: CreateMessageRequest,
    ) -> Result<CreateMessageResult> {
        tokio::select! {
            _ = cancel.cancelled() => {
                *self.saw_cancel.lock() = true;
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        Ok(CreateMessageResult {
            content: Content::text("done"),
            role: Role::Assistant,
            model: "m".to_string(),
            stop_reason: None,
        })
    }
}

async fn build_client(
    transport: Arc<ScriptedTransport>,
    notify: Option<Arc<RecordingNotifyHandler>>,
    sampler: Option<Arc<SlowSampler>>,
) -> Client {
    let mut builder = Client::builder(transport)
        .client_info(Implementation::new("test", "0"))
        .init_timeout(Duration::from_secs(2));
    if let Some(notify) = notify {
        builder = builder.notify_handler(notify);
    }
    if let Some(sampler) = sampler {
        builder = builder.sampling_handler(sampler);
    }
    builder.build().await.unwrap()
}

#[tokio::test]
async fn test_handshake_caches_server_identity() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let client = build_client(transport.clone(), None, None).await;

    assert_eq!(client.server_info().unwrap().name, "scripted");
    assert_eq!(client.server_instructions(), "be gentle");
    assert!(client.server_capabilities().unwrap().tools.is_some());

    // initialize request then initialized notification, in order
    let frames = transport.sent_frames();
    assert_eq!(frames[0]["method"], "initialize");
    assert_eq!(frames[1]["method"], "notifications/initialized");
    assert!(frames[1].get("id").is_none());
}

#[tokio::test]
async fn test_handshake_rejects_unknown_version() {
    let transport = Arc::new(ScriptedTransport::new("1990-01-01"));
    let result = Client::builder(transport)
        .init_timeout(Duration::from_secs(2))
        .build()
        .await;
    let err = result.err().expect("version mismatch must fail").to_string();
    assert!(err.contains("not supported"));
}

#[tokio::test]
async fn test_ping_correlates_response() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let client = build_client(transport.clone(), None, None).await;

    client.ping().await.unwrap();

    let frames = transport.sent_frames();
    let ping = frames.iter().find(|f| f["method"] == "ping").unwrap();
    // ids increment monotonically: initialize took 1
    assert_eq!(ping["id"], 2);
}

#[tokio::test]
async fn test_unknown_capability_gated_before_send() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let client = build_client(transport.clone(), None, None).await;

    // the scripted server advertises no prompts capability
    let err = client.list_prompts(None).await.err().unwrap();
    assert!(matches!(err, td_types::McpError::ServerNotSupport));
    assert!(!transport
        .sent_frames()
        .iter()
        .any(|f| f["method"] == "prompts/list"));
}

#[tokio::test]
async fn test_inbound_notification_reaches_handler() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let notify = Arc::new(RecordingNotifyHandler {
        tools_changed: Mutex::new(0),
    });
    let _client = build_client(transport.clone(), Some(notify.clone()), None).await;

    transport
        .inject(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/listChanged"
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*notify.tools_changed.lock(), 1);
}

#[tokio::test]
async fn test_inbound_server_ping_answered() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let _client = build_client(transport.clone(), None, None).await;

    transport
        .inject(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "srv-1",
            "method": "ping"
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let frames = transport.sent_frames();
    let reply = frames
        .iter()
        .find(|f| f["id"] == "srv-1" && f.get("method").is_none())
        .expect("ping reply");
    assert!(reply.get("result").is_some());
}

#[tokio::test]
async fn test_sampling_without_handler_rejected() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let _client = build_client(transport.clone(), None, None).await;

    transport
        .inject(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "srv-2",
            "method": "sampling/createMessage",
            "params": {"messages": [], "maxTokens": 8}
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let frames = transport.sent_frames();
    let reply = frames
        .iter()
        .find(|f| f["id"] == "srv-2" && f.get("method").is_none())
        .expect("error reply");
    assert_eq!(reply["error"]["code"], -32603);
}

#[tokio::test]
async fn test_cancelled_notification_trips_sampling_handler() {
    let transport = Arc::new(ScriptedTransport::new("2025-03-26"));
    let sampler = Arc::new(SlowSampler {
        saw_cancel: Mutex::new(false),
    });
    let _client = build_client(transport.clone(), None, Some(sampler.clone())).await;

    transport
        .inject(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "srv-3",
            "method": "sampling/createMessage",
            "params": {
                "messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}],
                "maxTokens": 8
            }
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    transport
        .inject(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": "srv-3", "reason": "test"}
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(*sampler.saw_cancel.lock());
}
