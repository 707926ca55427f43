//! End-to-end tests over the streamable-HTTP transport: a real server on a
//! loopback listener, exercised by the tandem client and by raw HTTP.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use td_client::{Client, SamplingHandler};
use td_protocol::{
    CallToolRequest, Content, CreateMessageRequest, CreateMessageResult, Implementation,
    InputSchema, Role, SamplingMessage, Tool,
};
use td_server::Server;
use td_transport::{
    StateMode, StreamableHttpClientTransport, StreamableHttpServerTransport, SESSION_ID_HEADER,
};
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;

async fn start_server(state_mode: StateMode) -> (Server, SocketAddr) {
    let transport = Arc::new(
        StreamableHttpServerTransport::new("127.0.0.1:0").with_state_mode(state_mode),
    );
    let addr = transport.bind().await.unwrap();

    let server = Server::builder(transport)
        .server_info(Implementation::new("tandem-test-server", "0.0.0"))
        .instructions("test fixture")
        .build();

    server.register_tool(
        Tool::new("echo", "echo the x argument back", InputSchema::empty_object()),
        |_ctx, req: CallToolRequest| async move {
            let text = req
                .arguments
                .as_ref()
                .and_then(|args| args.get("x"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(td_protocol::CallToolResult::text(text))
        },
    );

    server.register_tool(
        Tool::new("ask_model", "runs a sampling round trip", InputSchema::empty_object()),
        |ctx, _req| async move {
            let request = CreateMessageRequest::new(
                vec![SamplingMessage {
                    role: Role::User,
                    content: Content::text("say hi"),
                }],
                16,
            );
            let result = ctx.sampling(request).await?;
            match result.content {
                Content::Text { text } => Ok(td_protocol::CallToolResult::text(text)),
                other => Err(McpError::Internal(format!("unexpected content: {other:?}"))),
            }
        },
    );

    server.register_tool(
        Tool::new("slow", "waits for cancellation", InputSchema::empty_object()),
        |ctx, _req| async move {
            tokio::select! {
                _ = ctx.cancelled() => Ok(td_protocol::CallToolResult::text("cancelled")),
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    Ok(td_protocol::CallToolResult::text("timeout"))
                }
            }
        },
    );

    let runner = server.clone();
    tokio::spawn(async move { runner.run().await });
    // give the serve loop a beat to come up
    tokio::time::sleep(Duration::from_millis(50)).await;

    (server, addr)
}

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{addr}/mcp")
}

struct FixedSampler;

#[async_trait]
impl SamplingHandler for FixedSampler {
    async fn create_message(
        &self,
        _cancel: CancellationToken,
        _request: CreateMessageRequest,
    ) -> Result<CreateMessageResult> {
        Ok(CreateMessageResult {
            content: Content::text("sampled-reply"),
            role: Role::Assistant,
            model: "fixture-model".to_string(),
            stop_reason: Some("end_turn".into()),
        })
    }
}

async fn connect_client(addr: SocketAddr) -> (Client, Arc<StreamableHttpClientTransport>) {
    let transport =
        Arc::new(StreamableHttpClientTransport::new(&endpoint(addr)).unwrap());
    let client = Client::builder(transport.clone())
        .client_info(Implementation::new("tandem-test-client", "0.0.0"))
        .sampling_handler(Arc::new(FixedSampler))
        .build()
        .await
        .unwrap();
    (client, transport)
}

#[tokio::test]
async fn test_stateful_handshake_assigns_session() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let init_body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "clientInfo": {"name": "c", "version": "0"},
            "capabilities": {},
            "protocolVersion": "2024-11-05"
        }
    });

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&init_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .expect("session header")
        .to_string();

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["serverInfo"]["name"], "tandem-test-server");
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["instructions"], "test fixture");

    // initialized notification completes the handshake with 202
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // the session is ready: a normal request now goes through
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["result"]["tools"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_requests_rejected_before_ready() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    // initialize but skip the initialized notification
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"clientInfo": {"name": "c", "version": "0"}, "capabilities": {}, "protocolVersion": "2024-11-05"}
        }))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // ping stays admissible before ready
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_duplicate_initialize_rejected() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let init = serde_json::json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {"clientInfo": {"name": "c", "version": "0"}, "capabilities": {}, "protocolVersion": "2024-11-05"}
    });

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&init)
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&init)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_client_tool_call_roundtrip() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let (client, _transport) = connect_client(addr).await;

    let mut args = HashMap::new();
    args.insert("x".to_string(), serde_json::json!("hi"));
    let result = client
        .call_tool(CallToolRequest::new("echo", args))
        .await
        .unwrap();

    assert_eq!(result.content, vec![Content::text("hi")]);
    assert!(!result.is_error);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_to_client_sampling() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let (client, _transport) = connect_client(addr).await;

    // wait for the client's GET stream to come up so the server can push
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let result = client
        .call_tool(CallToolRequest::new("ask_model", HashMap::new()))
        .await
        .unwrap();
    assert_eq!(result.content, vec![Content::text("sampled-reply")]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_reaches_handler() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"clientInfo": {"name": "c", "version": "0"}, "capabilities": {}, "protocolVersion": "2024-11-05"}
        }))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    http.post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();

    // run the slow tool, then cancel it explicitly
    let call = {
        let http = http.clone();
        let session_id = session_id.clone();
        let url = endpoint(addr);
        tokio::spawn(async move {
            http.post(url)
                .header("Accept", "application/json, text/event-stream")
                .header(SESSION_ID_HEADER, &session_id)
                .json(&serde_json::json!({
                    "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": {"name": "slow", "arguments": {}}
                }))
                .send()
                .await
                .unwrap()
                .json::<serde_json::Value>()
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "method": "notifications/cancelled",
            "params": {"requestId": 2, "reason": "user abort"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let body = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["result"]["content"][0]["text"], "cancelled");
}

#[tokio::test]
async fn test_list_changed_broadcast_on_get_stream() {
    let (server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"clientInfo": {"name": "c", "version": "0"}, "capabilities": {}, "protocolVersion": "2024-11-05"}
        }))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    http.post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();

    // open the push stream, then mutate the registry
    let stream_response = http
        .get(endpoint(addr))
        .header("Accept", "text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(stream_response.status(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.register_tool(
        Tool::new("late", "registered mid-session", InputSchema::empty_object()),
        |_ctx, _req| async move { Ok(td_protocol::CallToolResult::text("late")) },
    );

    let mut stream = stream_response.bytes_stream();
    let saw_notification = tokio::time::timeout(Duration::from_secs(3), async {
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            if buffer.contains("notifications/tools/listChanged") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(saw_notification);
}

#[tokio::test]
async fn test_delete_unknown_session_is_400() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let response = http
        .delete(endpoint(addr))
        .header(SESSION_ID_HEADER, "no-such-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_closed_session_reports_404() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let http = reqwest::Client::new();

    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"clientInfo": {"name": "c", "version": "0"}, "capabilities": {}, "protocolVersion": "2024-11-05"}
        }))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let response = http
        .delete(endpoint(addr))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // the closed id never comes back
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .header(SESSION_ID_HEADER, &session_id)
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_client_reinitializes_after_session_loss() {
    let (_server, addr) = start_server(StateMode::Stateful).await;
    let (client, transport) = connect_client(addr).await;

    let first_session = transport.session_id().unwrap();

    // server side forgets the session
    let http = reqwest::Client::new();
    http.delete(endpoint(addr))
        .header(SESSION_ID_HEADER, &first_session)
        .send()
        .await
        .unwrap();

    // the next call hits 404, re-runs the handshake once and succeeds
    client.ping().await.unwrap();

    let second_session = transport.session_id().unwrap();
    assert_ne!(first_session, second_session);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stateless_mode() {
    let (_server, addr) = start_server(StateMode::Stateless).await;
    let http = reqwest::Client::new();

    // GET is refused
    let response = http
        .get(endpoint(addr))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);

    // a bare request works without any handshake
    let response = http
        .post(endpoint(addr))
        .header("Accept", "application/json, text/event-stream")
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["result"]["tools"].as_array().is_some());
}

#[tokio::test]
async fn test_graceful_shutdown_completes() {
    let (server, addr) = start_server(StateMode::Stateful).await;
    let (client, _transport) = connect_client(addr).await;

    client.ping().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server.shutdown(Duration::from_secs(4)))
        .await
        .expect("shutdown within deadline")
        .unwrap();
}
