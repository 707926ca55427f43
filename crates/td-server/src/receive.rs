//! Server-side inbound dispatch
//!
//! Every frame passes the three-way classifier: notifications are validated
//! against session readiness and handled synchronously, responses are routed
//! to the pending peer-call slot, requests are gated (only `initialize` and
//! `ping` before the session is ready), counted against the in-flight total
//! and served on a detached task. The task writes exactly one reply frame to
//! the per-request reply channel; on panic the channel is dropped and the
//! transport reports the failure.

use crate::handle;
use crate::server::ServerInner;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::sync::Arc;
use td_protocol::methods;
use td_protocol::{
    classify, request_id_key, CancelledNotification, FrameKind, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use td_transport::{ReceiveContext, ReplyReceiver, ServerReceiver};
use td_types::{McpError, Result};
use tokio::sync::oneshot;

pub(crate) struct ReceiverAdapter {
    inner: Arc<ServerInner>,
}

impl ReceiverAdapter {
    pub(crate) fn new(inner: Arc<ServerInner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServerReceiver for ReceiverAdapter {
    async fn receive(&self, ctx: ReceiveContext, msg: &[u8]) -> Result<Option<ReplyReceiver>> {
        let inner = &self.inner;

        if let Some(session_id) = ctx.session_id.as_deref().filter(|s| !s.is_empty()) {
            if !inner.session_manager.is_active(session_id) {
                if inner.session_manager.is_closed(session_id) {
                    return Err(McpError::SessionClosed(session_id.to_string()));
                }
                return Err(McpError::LackSession(session_id.to_string()));
            }
        }

        match classify(msg)? {
            FrameKind::Notification => {
                let notify: JsonRpcNotification = serde_json::from_slice(msg)?;
                if let Err(e) = receive_notify(inner, ctx.session_id.as_deref(), &notify).await {
                    tracing::error!("receive notify method={} error: {}", notify.method, e);
                    return Err(e);
                }
                Ok(None)
            }
            FrameKind::Response => {
                let response: JsonRpcResponse = serde_json::from_slice(msg)?;
                if let Err(e) = receive_response(inner, ctx.session_id.as_deref(), response) {
                    tracing::error!("receive response error: {}", e);
                    return Err(e);
                }
                Ok(None)
            }
            FrameKind::Request => {
                let request: JsonRpcRequest = serde_json::from_slice(msg)?;
                if !request.is_valid() {
                    return Err(McpError::RequestInvalid(format!(
                        "method={}",
                        request.method
                    )));
                }

                // before the handshake completes only initialize and ping go
                // through
                if let Some(session_id) = ctx.session_id.as_deref().filter(|s| !s.is_empty()) {
                    if request.method != methods::INITIALIZE && request.method != methods::PING {
                        let state = inner
                            .session_manager
                            .get(session_id)
                            .ok_or_else(|| McpError::LackSession(session_id.to_string()))?;
                        if !state.is_ready() {
                            return Err(McpError::SessionHasNotInitialized);
                        }
                    }
                }

                if !inner.begin_request() {
                    return Err(McpError::ShuttingDown);
                }

                let (tx, rx) = oneshot::channel();
                let inner = inner.clone();
                tokio::spawn(async move {
                    let task = receive_request(&inner, &ctx, request);
                    let outcome = std::panic::AssertUnwindSafe(task).catch_unwind().await;
                    inner.end_request();

                    match outcome {
                        Ok(response) => match serde_json::to_vec(&response) {
                            Ok(bytes) => {
                                let _ = tx.send(bytes);
                            }
                            Err(e) => {
                                tracing::error!("marshal response error: {}", e);
                            }
                        },
                        Err(panic) => {
                            // reply channel drops unanswered; the transport
                            // turns that into its failure status
                            tracing::error!("panic in request handler: {:?}", panic);
                        }
                    }
                });
                Ok(Some(rx))
            }
        }
    }
}

/// Serve one request to completion, always producing a response frame.
///
/// The request is registered with the session's cancellation registry for
/// the duration of the handler, so an inbound `notifications/cancelled`
/// reaches the handler context.
async fn receive_request(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(serde_json::Value::Null);

    if request.method != methods::PING {
        if let Some(session_id) = ctx.session_id.as_deref() {
            inner.session_manager.touch(session_id);
        }
    }

    let session_id = ctx.session_id.clone().unwrap_or_default();
    let session_state = inner.session_manager.get(&session_id);
    let cancel_key = request_id_key(&id);
    let cancel = session_state
        .as_ref()
        .map(|state| state.cancellations().register(cancel_key.clone()))
        .unwrap_or_default();

    let context = crate::RequestContext {
        session_id,
        request_id: id.clone(),
        cancel,
        server: inner.clone(),
    };

    let result = handle::dispatch_request(inner, ctx, &request, context).await;

    if let Some(state) = session_state {
        state.cancellations().remove(&cancel_key);
    }

    match result {
        Ok(value) => match td_protocol::JsonRpcResponse::success(id.clone(), &value) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("marshal result error: {}", e);
                JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string())
            }
        },
        Err(e) => JsonRpcResponse::error(id, error_code(&e), e.to_string()),
    }
}

/// Notifications are handled synchronously; failures are logged and surfaced
/// to the transport but never answered on the wire.
async fn receive_notify(
    inner: &Arc<ServerInner>,
    session_id: Option<&str>,
    notify: &JsonRpcNotification,
) -> Result<()> {
    let state = match session_id.filter(|s| !s.is_empty()) {
        Some(session_id) => {
            let state = inner
                .session_manager
                .get(session_id)
                .ok_or_else(|| McpError::LackSession(session_id.to_string()))?;
            if notify.method != methods::NOTIFICATION_INITIALIZED && !state.is_ready() {
                return Err(McpError::SessionHasNotInitialized);
            }
            state.touch();
            Some(state)
        }
        None => None,
    };

    match notify.method.as_str() {
        methods::NOTIFICATION_INITIALIZED => {
            let Some(state) = state else {
                return Err(McpError::LackSession(String::new()));
            };
            if state.init_request_received() {
                state.set_ready();
                Ok(())
            } else if state.is_ready() {
                // synthetic stateless sessions are born ready
                Ok(())
            } else {
                Err(McpError::RequestInvalid(
                    "initialized notification before initialize".into(),
                ))
            }
        }
        methods::NOTIFICATION_CANCELLED => {
            let Some(state) = state else {
                return Err(McpError::LackSession(String::new()));
            };
            let cancelled: CancelledNotification = notify.params_as()?;
            let key = request_id_key(&cancelled.request_id);
            if state.cancellations().cancel(&key) {
                tracing::info!(
                    "request {} cancelled, reason: {}",
                    key,
                    cancelled.reason.as_deref().unwrap_or("")
                );
            } else {
                tracing::debug!("cancellation for unknown request id={}", key);
            }
            Ok(())
        }
        methods::NOTIFICATION_PROGRESS => {
            // progress for a server-originated call; nothing to route yet
            tracing::debug!("progress notification received");
            Ok(())
        }
        other => Err(McpError::MethodNotSupport(format!("method={other}"))),
    }
}

fn receive_response(
    inner: &Arc<ServerInner>,
    session_id: Option<&str>,
    response: JsonRpcResponse,
) -> Result<()> {
    let session_id = session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| McpError::LackSession(String::new()))?;
    let state = inner
        .session_manager
        .get(session_id)
        .ok_or_else(|| McpError::LackSession(session_id.to_string()))?;
    state.touch();

    let key = request_id_key(&response.id);
    state.pending().deliver(&key, response)
}

fn error_code(err: &McpError) -> i64 {
    match err {
        McpError::MethodNotSupport(_) => METHOD_NOT_FOUND,
        McpError::RequestInvalid(_) => INVALID_REQUEST,
        McpError::Serialization(_) => PARSE_ERROR,
        _ => INTERNAL_ERROR,
    }
}
