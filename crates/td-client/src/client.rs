//! Client construction, handshake and typed server-call wrappers

use crate::handlers::{LoggingNotifyHandler, NotifyHandler, SamplingHandler};
use crate::receive::ReceiverAdapter;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use td_protocol::methods;
use td_protocol::{
    CallToolRequest, CallToolResult, CancelledNotification, ClientCapabilities, GetPromptRequest,
    GetPromptResult, Implementation, InitializeRequest, InitializeResult, InitializedNotification,
    JsonRpcNotification, JsonRpcRequest, ListPromptsRequest, ListPromptsResult,
    ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, PingRequest, PingResult, ProgressNotification, ReadResourceRequest,
    ReadResourceResult, RequestId, ServerCapabilities, SubscribeRequest, SubscribeResult,
    UnsubscribeRequest, UnsubscribeResult,
};
use td_session::{CancellationRegistry, PendingCalls};
use td_transport::ClientTransport;
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_INTERVAL: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn ClientTransport>,

    pub(crate) pending: PendingCalls,
    request_counter: AtomicI64,

    pub(crate) ready: AtomicBool,
    init_mutex: tokio::sync::Mutex<()>,

    client_info: Implementation,
    pub(crate) client_capabilities: ClientCapabilities,

    server_info: RwLock<Option<Implementation>>,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    server_instructions: RwLock<String>,

    pub(crate) notify_handler: Arc<dyn NotifyHandler>,
    pub(crate) sampling_handler: Option<Arc<dyn SamplingHandler>>,

    /// Tokens for inbound server-call handlers, tripped by
    /// `notifications/cancelled`.
    pub(crate) cancellations: CancellationRegistry,

    init_timeout: Duration,

    closed: CancellationToken,
}

/// MCP client: one transport connection to one server.
pub struct Client {
    inner: Arc<ClientInner>,
}

pub struct ClientBuilder {
    transport: Arc<dyn ClientTransport>,
    client_info: Implementation,
    notify_handler: Arc<dyn NotifyHandler>,
    sampling_handler: Option<Arc<dyn SamplingHandler>>,
    init_timeout: Duration,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
        Self {
            transport,
            client_info: Implementation::default(),
            notify_handler: Arc::new(LoggingNotifyHandler),
            sampling_handler: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    pub fn client_info(mut self, info: Implementation) -> Self {
        self.client_info = info;
        self
    }

    pub fn notify_handler(mut self, handler: Arc<dyn NotifyHandler>) -> Self {
        self.notify_handler = handler;
        self
    }

    /// Installing a sampling handler advertises the sampling capability.
    pub fn sampling_handler(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling_handler = Some(handler);
        self
    }

    /// Upper bound on the `initialize` round trip.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Start the transport, run the handshake, and launch the background
    /// server probe.
    pub async fn build(self) -> Result<Client> {
        let capabilities = ClientCapabilities {
            sampling: self
                .sampling_handler
                .is_some()
                .then(|| serde_json::json!({})),
        };

        let inner = Arc::new(ClientInner {
            transport: self.transport,
            pending: PendingCalls::new(),
            request_counter: AtomicI64::new(0),
            ready: AtomicBool::new(false),
            init_mutex: tokio::sync::Mutex::new(()),
            client_info: self.client_info,
            client_capabilities: capabilities,
            server_info: RwLock::new(None),
            server_capabilities: RwLock::new(None),
            server_instructions: RwLock::new(String::new()),
            notify_handler: self.notify_handler,
            sampling_handler: self.sampling_handler,
            cancellations: CancellationRegistry::new(),
            init_timeout: self.init_timeout,
            closed: CancellationToken::new(),
        });

        inner
            .transport
            .set_receiver(Arc::new(ReceiverAdapter::new(inner.clone())));

        inner
            .transport
            .start()
            .await
            .map_err(|e| McpError::Transport(format!("client transport start: {e}")))?;

        tokio::time::timeout(inner.init_timeout, inner.initialization())
            .await
            .map_err(|_| McpError::Timeout("initialize round trip".into()))??;

        // periodic liveness probe against the server
        let probe = inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = probe.closed.cancelled() => return,
                    _ = ticker.tick() => {
                        let ping = tokio::time::timeout(
                            PROBE_TIMEOUT,
                            probe.call_server(methods::PING, &PingRequest::default()),
                        )
                        .await;
                        match ping {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!("mcp client ping server fail: {}", e),
                            Err(_) => tracing::warn!("mcp client ping server fail: timeout"),
                        }
                    }
                }
            }
        });

        Ok(Client { inner })
    }
}

impl ClientInner {
    /// Send a request and await the correlated response; the reply slot is
    /// removed on both completion paths.
    pub(crate) async fn call_server<P: Serialize>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Box<RawValue>> {
        if !self.ready.load(Ordering::SeqCst)
            && method != methods::INITIALIZE
            && method != methods::PING
        {
            return Err(McpError::NotReady);
        }

        let id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let key = id.to_string();
        let rx = self.pending.register(key.clone());
        let _guard = PendingGuard {
            pending: &self.pending,
            key: &key,
        };

        self.send_request(serde_json::json!(id), method, params)
            .await?;

        let response = rx
            .await
            .map_err(|_| McpError::Internal("reply channel closed".into()))?;

        if let Some(err) = response.error {
            return Err(td_types::ResponseError::new(err.code, err.message, err.data).into());
        }
        // absent results decode as an empty object downstream
        Ok(response
            .result
            .unwrap_or_else(|| RawValue::from_string("{}".into()).expect("literal object")))
    }

    async fn send_request<P: Serialize>(
        &self,
        id: RequestId,
        method: &str,
        params: &P,
    ) -> Result<()> {
        let request = JsonRpcRequest::new(id, method, params)?;
        let bytes = serde_json::to_vec(&request)?;

        match self.transport.send(bytes.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_session_closed() && method != methods::INITIALIZE => {
                // The server lost our session; handshake again and retry the
                // send exactly once.
                Box::pin(self.re_initialization()).await?;
                self.transport.send(bytes).await
            }
            Err(e) => Err(McpError::Transport(format!("sendRequest: transport send: {e}"))),
        }
    }

    pub(crate) async fn send_notification<P: Serialize>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<()> {
        let notify = JsonRpcNotification::new(method, params)?;
        let bytes = serde_json::to_vec(&notify)?;
        self.transport
            .send(bytes)
            .await
            .map_err(|e| McpError::Transport(format!("sendNotification: transport send: {e}")))
    }

    pub(crate) async fn send_response<R: Serialize>(&self, id: RequestId, result: &R) -> Result<()> {
        let response = td_protocol::JsonRpcResponse::success(id, result)?;
        let bytes = serde_json::to_vec(&response)?;
        self.transport
            .send(bytes)
            .await
            .map_err(|e| McpError::Transport(format!("sendResponse: transport send: {e}")))
    }

    pub(crate) async fn send_error_response(
        &self,
        id: RequestId,
        code: i64,
        message: String,
    ) -> Result<()> {
        let response = td_protocol::JsonRpcResponse::error(id, code, message);
        let bytes = serde_json::to_vec(&response)?;
        self.transport
            .send(bytes)
            .await
            .map_err(|e| McpError::Transport(format!("sendResponse: transport send: {e}")))
    }

    async fn initialization(&self) -> Result<InitializeResult> {
        let request = InitializeRequest {
            client_info: self.client_info.clone(),
            capabilities: self.client_capabilities.clone(),
            protocol_version: methods::LATEST_PROTOCOL_VERSION.to_string(),
        };

        let raw = self.call_server(methods::INITIALIZE, &request).await?;
        let result: InitializeResult = serde_json::from_str(raw.get())?;

        if !methods::is_supported_version(&result.protocol_version) {
            return Err(McpError::Protocol(format!(
                "protocol version {} not supported, supported latest version is {}",
                result.protocol_version,
                methods::LATEST_PROTOCOL_VERSION
            )));
        }

        self.send_notification(
            methods::NOTIFICATION_INITIALIZED,
            &InitializedNotification::default(),
        )
        .await
        .map_err(|e| McpError::Protocol(format!("failed to send InitializedNotification: {e}")))?;

        *self.server_info.write() = Some(result.server_info.clone());
        *self.server_capabilities.write() = Some(result.capabilities.clone());
        *self.server_instructions.write() = result.instructions.clone();

        self.ready.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Double-checked re-handshake after the server reported our session
    /// closed.
    async fn re_initialization(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        let _lock = self.init_mutex.lock().await;
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.initialization().await?;
        Ok(())
    }

    pub(crate) fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.read().clone()
    }
}

/// Removes the pending slot when the call completes or is abandoned.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    key: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.key);
    }
}

impl Client {
    pub fn builder(transport: Arc<dyn ClientTransport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.server_capabilities()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.inner.server_info.read().clone()
    }

    /// Free-text guidance the server returned from the handshake.
    pub fn server_instructions(&self) -> String {
        self.inner.server_instructions.read().clone()
    }

    pub async fn ping(&self) -> Result<PingResult> {
        let raw = self
            .inner
            .call_server(methods::PING, &PingRequest::default())
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        if self.capabilities()?.tools.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::TOOLS_LIST, &ListToolsRequest { cursor })
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResult> {
        if self.capabilities()?.tools.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self.inner.call_server(methods::TOOLS_CALL, &request).await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        if self.capabilities()?.prompts.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::PROMPTS_LIST, &ListPromptsRequest { cursor })
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn get_prompt(&self, request: GetPromptRequest) -> Result<GetPromptResult> {
        if self.capabilities()?.prompts.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::PROMPTS_GET, &request)
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        if self.capabilities()?.resources.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::RESOURCES_LIST, &ListResourcesRequest { cursor })
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        if self.capabilities()?.resources.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(
                methods::RESOURCES_TEMPLATES_LIST,
                &ListResourceTemplatesRequest { cursor },
            )
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn read_resource(&self, request: ReadResourceRequest) -> Result<ReadResourceResult> {
        if self.capabilities()?.resources.is_none() {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::RESOURCES_READ, &request)
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn subscribe_resource_change(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeResult> {
        if !self
            .capabilities()?
            .resources
            .map(|r| r.subscribe)
            .unwrap_or(false)
        {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::RESOURCES_SUBSCRIBE, &request)
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    pub async fn unsubscribe_resource_change(
        &self,
        request: UnsubscribeRequest,
    ) -> Result<UnsubscribeResult> {
        if !self
            .capabilities()?
            .resources
            .map(|r| r.subscribe)
            .unwrap_or(false)
        {
            return Err(McpError::ServerNotSupport);
        }
        let raw = self
            .inner
            .call_server(methods::RESOURCES_UNSUBSCRIBE, &request)
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Explicitly cancel an outstanding request previously issued to the
    /// server.
    pub async fn cancel_request(&self, request_id: RequestId, reason: Option<String>) -> Result<()> {
        self.inner
            .send_notification(
                methods::NOTIFICATION_CANCELLED,
                &CancelledNotification { request_id, reason },
            )
            .await
    }

    pub async fn notify_progress(&self, notify: ProgressNotification) -> Result<()> {
        self.inner
            .send_notification(methods::NOTIFICATION_PROGRESS, &notify)
            .await
    }

    /// Stop the probe task and close the transport.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.cancel();
        self.inner.transport.close().await
    }

    fn capabilities(&self) -> Result<ServerCapabilities> {
        self.inner.server_capabilities().ok_or(McpError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_guard_removes_slot() {
        let pending = PendingCalls::new();
        let _rx = pending.register("9".into());
        {
            let _guard = PendingGuard {
                pending: &pending,
                key: "9",
            };
        }
        assert!(pending.is_empty());
    }
}
