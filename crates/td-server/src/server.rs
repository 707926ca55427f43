//! Server construction, registries and lifecycle

use crate::receive::ReceiverAdapter;
use crate::registry::{
    PromptEntry, PromptHandler, ResourceEntry, ResourceHandler, TemplateEntry, ToolEntry,
    ToolHandler,
};
use crate::RequestContext;
use dashmap::DashMap;
use futures::future::FutureExt;
use serde::Serialize;
use serde_json::value::RawValue;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use td_protocol::methods;
use td_protocol::{
    request_id_key, CallToolRequest, CallToolResult, GetPromptRequest, GetPromptResult,
    Implementation, JsonRpcNotification, JsonRpcRequest, PingRequest, Prompt,
    PromptsCapability, ReadResourceRequest, ReadResourceResult, Resource, ResourceTemplate,
    ResourceUpdatedNotification, ResourcesCapability, ServerCapabilities, Tool, ToolsCapability,
};
use td_session::SessionManager;
use td_transport::ServerTransport;
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;

const DETECTION_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) struct ServerInner {
    pub(crate) transport: Arc<dyn ServerTransport>,

    pub(crate) tools: DashMap<String, ToolEntry>,
    pub(crate) prompts: DashMap<String, PromptEntry>,
    pub(crate) resources: DashMap<String, ResourceEntry>,
    pub(crate) resource_templates: DashMap<String, TemplateEntry>,

    pub(crate) session_manager: Arc<SessionManager>,

    pub(crate) in_shutdown: AtomicBool,
    in_flight: AtomicUsize,
    drained: tokio::sync::Notify,

    pub(crate) capabilities: ServerCapabilities,
    pub(crate) server_info: Implementation,
    pub(crate) instructions: String,

    /// Page size for registry list methods; `None` returns everything on the
    /// first page.
    pub(crate) page_size: Option<usize>,
}

impl ServerInner {
    /// Call a method on the client behind `session_id` and await the
    /// correlated reply. The reply slot is removed on both completion paths.
    pub(crate) async fn call_client<P: Serialize>(
        &self,
        session_id: &str,
        method: &str,
        params: &P,
    ) -> Result<Box<RawValue>> {
        let state = self
            .session_manager
            .get(session_id)
            .ok_or_else(|| McpError::LackSession(session_id.to_string()))?;

        let request_id = state.next_request_id();
        let key = request_id.to_string();
        let rx = state.pending().register(key.clone());

        let result = async {
            let request =
                JsonRpcRequest::new(serde_json::json!(request_id), method, params)?;
            let bytes = serde_json::to_vec(&request)?;
            self.transport
                .send(session_id, bytes)
                .await
                .map_err(|e| McpError::Transport(format!("sendRequest: transport send: {e}")))?;

            let response = rx
                .await
                .map_err(|_| McpError::Internal("reply channel closed".into()))?;
            if let Some(err) = response.error {
                return Err(
                    td_types::ResponseError::new(err.code, err.message, err.data).into(),
                );
            }
            // absent results decode as an empty object downstream
            Ok(response
                .result
                .unwrap_or_else(|| RawValue::from_string("{}".into()).expect("literal object")))
        }
        .await;

        state.pending().remove(&key);
        result
    }

    pub(crate) async fn send_notification<P: Serialize>(
        &self,
        session_id: &str,
        method: &str,
        params: &P,
    ) -> Result<()> {
        let notify = JsonRpcNotification::new(method, params)?;
        let bytes = serde_json::to_vec(&notify)?;
        self.transport
            .send(session_id, bytes)
            .await
            .map_err(|e| McpError::Transport(format!("sendNotification: transport send: {e}")))
    }

    pub(crate) fn begin_request(&self) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.in_shutdown.load(Ordering::SeqCst) {
            self.end_request();
            return false;
        }
        true
    }

    pub(crate) fn end_request(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_in_flight_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Heartbeat probe used by the session sweep: ping with a short
    /// deadline. Suppressed while shutdown is in progress.
    async fn detect_session(&self, session_id: String) -> Result<()> {
        if self.in_shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match tokio::time::timeout(
            DETECTION_TIMEOUT,
            self.call_client(&session_id, methods::PING, &PingRequest::default()),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpError::Timeout(format!("ping session {session_id}"))),
        }
    }
}

/// MCP server bound to one server transport.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

pub struct ServerBuilder {
    transport: Arc<dyn ServerTransport>,
    capabilities: ServerCapabilities,
    server_info: Implementation,
    instructions: String,
    session_max_idle_time: Duration,
    page_size: Option<usize>,
}

impl ServerBuilder {
    pub fn new(transport: Arc<dyn ServerTransport>) -> Self {
        Self {
            transport,
            capabilities: ServerCapabilities {
                prompts: Some(PromptsCapability { list_changed: true }),
                resources: Some(ResourcesCapability {
                    list_changed: true,
                    subscribe: true,
                }),
                tools: Some(ToolsCapability { list_changed: true }),
            },
            server_info: Implementation::default(),
            instructions: String::new(),
            session_max_idle_time: Duration::ZERO,
            page_size: None,
        }
    }

    /// Advertised in the `initialize` response; gates list-change broadcasts
    /// and resource subscription.
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn server_info(mut self, info: Implementation) -> Self {
        self.server_info = info;
        self
    }

    /// Free text shown to the peer after the handshake.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Idle horizon for the session sweep; zero disables idle reaping.
    pub fn session_max_idle_time(mut self, max_idle: Duration) -> Self {
        self.session_max_idle_time = max_idle;
        self
    }

    /// Page size for registry list methods.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn build(self) -> Server {
        let session_manager = Arc::new(SessionManager::new());
        session_manager.set_max_idle_time(self.session_max_idle_time);

        let inner = Arc::new(ServerInner {
            transport: self.transport,
            tools: DashMap::new(),
            prompts: DashMap::new(),
            resources: DashMap::new(),
            resource_templates: DashMap::new(),
            session_manager: session_manager.clone(),
            in_shutdown: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: tokio::sync::Notify::new(),
            capabilities: self.capabilities,
            server_info: self.server_info,
            instructions: self.instructions,
            page_size: self.page_size,
        });

        let detection_target: Weak<ServerInner> = Arc::downgrade(&inner);
        session_manager.set_detection(Arc::new(move |session_id| {
            let target = detection_target.clone();
            async move {
                match target.upgrade() {
                    Some(inner) => inner.detect_session(session_id).await,
                    None => Ok(()),
                }
            }
            .boxed()
        }));

        inner
            .transport
            .set_receiver(Arc::new(ReceiverAdapter::new(inner.clone())));
        inner
            .transport
            .set_session_manager(session_manager);

        Server { inner }
    }
}

impl Server {
    pub fn builder(transport: Arc<dyn ServerTransport>) -> ServerBuilder {
        ServerBuilder::new(transport)
    }

    /// Start the heartbeat sweep and the transport; returns when the
    /// transport finishes its shutdown.
    pub async fn run(&self) -> Result<()> {
        let manager = self.inner.session_manager.clone();
        tokio::spawn(manager.run_heartbeat());

        self.inner
            .transport
            .run()
            .await
            .map_err(|e| McpError::Transport(format!("mcp server transport run fail: {e}")))
    }

    /// Graceful shutdown: reject new requests, wait for in-flight handlers,
    /// stop the sweep, run the transport's two-phase shutdown. Bounded by
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.inner.in_shutdown.store(true, Ordering::SeqCst);

        let server_done = CancellationToken::new();
        let waiter = self.inner.clone();
        let done = server_done.clone();
        tokio::spawn(async move {
            waiter.wait_in_flight_drained().await;
            done.cancel();
        });

        self.inner.session_manager.stop_heartbeat();

        self.inner.transport.shutdown(server_done, deadline).await
    }

    /// Register a tool; replaces an existing tool of the same name and
    /// notifies connected peers.
    pub fn register_tool<F, Fut>(&self, tool: Tool, handler: F)
    where
        F: Fn(RequestContext, CallToolRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |ctx, req| handler(ctx, req).boxed());
        self.inner
            .tools
            .insert(tool.name.clone(), ToolEntry { tool, handler });
        self.broadcast_list_changed(ListKind::Tools);
    }

    /// Deregistration is idempotent.
    pub fn unregister_tool(&self, name: &str) {
        self.inner.tools.remove(name);
        self.broadcast_list_changed(ListKind::Tools);
    }

    pub fn register_prompt<F, Fut>(&self, prompt: Prompt, handler: F)
    where
        F: Fn(RequestContext, GetPromptRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
    {
        let handler: PromptHandler = Arc::new(move |ctx, req| handler(ctx, req).boxed());
        self.inner
            .prompts
            .insert(prompt.name.clone(), PromptEntry { prompt, handler });
        self.broadcast_list_changed(ListKind::Prompts);
    }

    pub fn unregister_prompt(&self, name: &str) {
        self.inner.prompts.remove(name);
        self.broadcast_list_changed(ListKind::Prompts);
    }

    pub fn register_resource<F, Fut>(&self, resource: Resource, handler: F)
    where
        F: Fn(RequestContext, ReadResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        let handler: ResourceHandler = Arc::new(move |ctx, req| handler(ctx, req).boxed());
        self.inner
            .resources
            .insert(resource.uri.clone(), ResourceEntry { resource, handler });
        self.broadcast_list_changed(ListKind::Resources);
    }

    pub fn unregister_resource(&self, uri: &str) {
        self.inner.resources.remove(uri);
        self.broadcast_list_changed(ListKind::Resources);
    }

    /// Register a resource template; the URI template must parse before the
    /// entry is inserted.
    pub fn register_resource_template<F, Fut>(
        &self,
        template: ResourceTemplate,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(RequestContext, ReadResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        let compiled = Arc::new(template.compile()?);
        let handler: ResourceHandler = Arc::new(move |ctx, req| handler(ctx, req).boxed());
        self.inner.resource_templates.insert(
            template.uri_template.clone(),
            TemplateEntry {
                template,
                compiled,
                handler,
            },
        );
        self.broadcast_list_changed(ListKind::Resources);
        Ok(())
    }

    pub fn unregister_resource_template(&self, uri_template: &str) {
        self.inner.resource_templates.remove(uri_template);
        self.broadcast_list_changed(ListKind::Resources);
    }

    /// Notify every session subscribed to `uri` that the resource changed.
    pub async fn notify_resources_updated(&self, uri: &str) -> Result<()> {
        let subscribe_supported = self
            .inner
            .capabilities
            .resources
            .as_ref()
            .map(|r| r.subscribe)
            .unwrap_or(false);
        if !subscribe_supported {
            return Err(McpError::ServerNotSupport);
        }

        let notify = ResourceUpdatedNotification {
            uri: uri.to_string(),
        };
        let mut targets = Vec::new();
        self.inner.session_manager.range(|session_id, state| {
            if state.is_subscribed(uri) {
                targets.push(session_id.to_string());
            }
            true
        });

        let mut failures = Vec::new();
        for session_id in targets {
            if let Err(e) = self
                .inner
                .send_notification(
                    &session_id,
                    methods::NOTIFICATION_RESOURCES_UPDATED,
                    &notify,
                )
                .await
            {
                failures.push(format!("sessionID={session_id}, err: {e}"));
            }
        }
        join_failures(failures)
    }

    /// Cancel an outstanding server-to-client request.
    pub async fn cancel_request(
        &self,
        session_id: &str,
        request_id: td_protocol::RequestId,
        reason: Option<String>,
    ) -> Result<()> {
        let key = request_id_key(&request_id);
        if let Some(state) = self.inner.session_manager.get(session_id) {
            state.pending().remove(&key);
        }
        self.inner
            .send_notification(
                session_id,
                methods::NOTIFICATION_CANCELLED,
                &td_protocol::CancelledNotification { request_id, reason },
            )
            .await
    }

    fn broadcast_list_changed(&self, kind: ListKind) {
        if self.inner.session_manager.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = send_list_changed(&inner, kind).await {
                tracing::warn!("send notification {} list changes fail: {}", kind.name(), e);
            }
        });
    }
}

#[derive(Clone, Copy)]
pub(crate) enum ListKind {
    Tools,
    Prompts,
    Resources,
}

impl ListKind {
    fn name(&self) -> &'static str {
        match self {
            ListKind::Tools => "tool",
            ListKind::Prompts => "prompt",
            ListKind::Resources => "resource",
        }
    }
}

/// Enqueue the matching `*ListChanged` notification on every active
/// session; per-session failures are aggregated, never aborting the sweep.
pub(crate) async fn send_list_changed(inner: &Arc<ServerInner>, kind: ListKind) -> Result<()> {
    let supported = match kind {
        ListKind::Tools => inner
            .capabilities
            .tools
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false),
        ListKind::Prompts => inner
            .capabilities
            .prompts
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false),
        ListKind::Resources => inner
            .capabilities
            .resources
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false),
    };
    if !supported {
        return Err(McpError::ServerNotSupport);
    }

    let method = match kind {
        ListKind::Tools => methods::NOTIFICATION_TOOLS_LIST_CHANGED,
        ListKind::Prompts => methods::NOTIFICATION_PROMPTS_LIST_CHANGED,
        ListKind::Resources => methods::NOTIFICATION_RESOURCES_LIST_CHANGED,
    };

    let mut targets = Vec::new();
    inner.session_manager.range(|session_id, _| {
        targets.push(session_id.to_string());
        true
    });

    let mut failures = Vec::new();
    for session_id in targets {
        if let Err(e) = inner
            .send_notification(&session_id, method, &serde_json::json!({}))
            .await
        {
            failures.push(format!("sessionID={session_id}, err: {e}"));
        }
    }
    join_failures(failures)
}

fn join_failures(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(McpError::Internal(failures.join("; ")))
    }
}
