//! Streamable-HTTP server transport
//!
//! One endpoint (default `/mcp`) multiplexes three methods: POST carries a
//! single JSON-RPC frame and returns the reply (or `202` when no reply is
//! expected), GET opens the session's server-push SSE stream, DELETE closes
//! a session. In stateful mode `initialize` mints a session whose id rides
//! the `Mcp-Session-Id` header; in stateless mode each POST runs under a
//! synthetic one-shot session and GET is refused.
//!
//! The HTTP request context never cancels dispatch: client disconnects are
//! not cancellations, an explicit `notifications/cancelled` frame is.

use crate::traits::{
    ReceiveContext, ServerReceiver, ServerTransport, SESSION_ID_HEADER,
};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use parking_lot::RwLock;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use td_protocol::{JsonRpcResponse, INTERNAL_ERROR};
use td_session::SessionManager;
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Session handling mode of the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// `initialize` creates a session whose id is required on every later
    /// request; GET streams are supported.
    Stateful,
    /// Every POST runs under a synthetic per-request session; GET is
    /// rejected with `405`.
    Stateless,
}

struct Inner {
    addr: String,
    endpoint: String,
    state_mode: StateMode,

    receiver: RwLock<Option<Arc<dyn ServerReceiver>>>,
    session_manager: RwLock<Option<Arc<SessionManager>>>,

    /// Transport lifetime; cancelled during shutdown after dispatch drains.
    cancel: CancellationToken,
    /// Stops the listener from accepting new requests.
    stop_accepting: CancellationToken,
    /// Cancelled when the serve loop has fully returned.
    run_done: CancellationToken,
    started: AtomicBool,

    /// In-flight outbound sends, awaited during shutdown.
    sends: TaskTracker,

    /// Listener pre-bound by [`StreamableHttpServerTransport::bind`].
    listener: tokio::sync::Mutex<Option<tokio::net::TcpListener>>,
}

pub struct StreamableHttpServerTransport {
    inner: Arc<Inner>,
}

impl StreamableHttpServerTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                endpoint: "/mcp".to_string(),
                state_mode: StateMode::Stateful,
                receiver: RwLock::new(None),
                session_manager: RwLock::new(None),
                cancel: CancellationToken::new(),
                stop_accepting: CancellationToken::new(),
                run_done: CancellationToken::new(),
                started: AtomicBool::new(false),
                sends: TaskTracker::new(),
                listener: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Bind the listener ahead of [`ServerTransport::run`], returning the
    /// bound address. Useful when the configured address carries port 0.
    pub async fn bind(&self) -> Result<std::net::SocketAddr> {
        let listener = tokio::net::TcpListener::bind(&self.inner.addr)
            .await
            .map_err(|e| McpError::Transport(format!("failed to bind {}: {e}", self.inner.addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| McpError::Transport(format!("local addr: {e}")))?;
        *self.inner.listener.lock().await = Some(listener);
        Ok(addr)
    }

    /// Path the endpoint listens on, default `/mcp`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_endpoint before sharing the transport")
            .endpoint = endpoint.into();
        self
    }

    pub fn with_state_mode(mut self, mode: StateMode) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_state_mode before sharing the transport")
            .state_mode = mode;
        self
    }
}

/// JSON-RPC error body with the given HTTP status, per the wire contract for
/// receiver-side failures.
fn error_response(status: StatusCode, message: &str) -> Response {
    if status == StatusCode::METHOD_NOT_ALLOWED {
        tracing::info!("streamable http response: code: {}, message: {}", status, message);
    } else {
        tracing::error!("streamable http error: code: {}, message: {}", status, message);
    }
    let body = JsonRpcResponse::error(serde_json::Value::Null, INTERNAL_ERROR, message);
    let payload = serde_json::to_vec(&body).unwrap_or_default();
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn handle_post(
    State(inner): State<Arc<Inner>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if headers.get(header::ACCEPT).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Missing Accept header");
    }

    let Some(receiver) = inner.receiver.read().clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "receiver not installed");
    };
    let Some(manager) = inner.session_manager.read().clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "session manager not installed");
    };

    // Stateful POSTs may mint a session while handling initialize; the slot
    // carries the fresh id back for the response header.
    let new_session_slot = match inner.state_mode {
        StateMode::Stateful => Some(Arc::new(OnceLock::new())),
        StateMode::Stateless => None,
    };

    // Stateless mode runs every frame under a synthetic one-shot session
    // that is already past the handshake gate.
    let synthetic_session = match inner.state_mode {
        StateMode::Stateless => {
            let session_id = manager.create_session();
            if let Some(state) = manager.get(&session_id) {
                state.set_ready();
            }
            Some(session_id)
        }
        StateMode::Stateful => None,
    };

    let ctx = ReceiveContext {
        session_id: synthetic_session
            .clone()
            .or_else(|| header_session_id(&headers)),
        new_session_id: new_session_slot.clone(),
    };

    let received = receiver.receive(ctx, &body).await;

    let response = match received {
        Err(McpError::SessionClosed(_)) => {
            error_response(StatusCode::NOT_FOUND, "Failed to receive: session closed")
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &format!("Failed to receive: {e}")),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Ok(Some(reply)) => match reply.await {
            Ok(msg) if !msg.is_empty() => {
                let mut response = (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    msg,
                )
                    .into_response();
                if let Some(session_id) = new_session_slot.as_ref().and_then(|slot| slot.get()) {
                    if let Ok(value) = session_id.parse() {
                        response.headers_mut().insert(SESSION_ID_HEADER, value);
                    }
                }
                response
            }
            _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "handle request fail"),
        },
    };

    if let Some(session_id) = synthetic_session {
        manager.close_session(&session_id);
    }

    response
}

async fn handle_get(State(inner): State<Arc<Inner>>, headers: HeaderMap) -> Response {
    if inner.state_mode == StateMode::Stateless {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "server is stateless, not support sse connection",
        );
    }

    let accepts_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    if !accepts_sse {
        return error_response(StatusCode::BAD_REQUEST, "Must accept text/event-stream");
    }

    let Some(session_id) = header_session_id(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing Session ID");
    };

    let Some(manager) = inner.session_manager.read().clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "session manager not installed");
    };
    if let Err(e) = manager.open_outbox(&session_id) {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let stream = async_stream::stream! {
        loop {
            match manager.dequeue(&session_id).await {
                Ok(msg) => {
                    let payload = String::from_utf8_lossy(&msg).into_owned();
                    tracing::debug!("sending message: {}", payload);
                    yield Ok::<_, Infallible>(Event::default().data(payload));
                }
                Err(McpError::SendEof) => break,
                Err(e) => {
                    tracing::debug!(
                        "sse connect dequeue err: {}, sessionID={}",
                        e,
                        session_id
                    );
                    break;
                }
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_delete(State(inner): State<Arc<Inner>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing session ID");
    };

    let Some(manager) = inner.session_manager.read().clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "session manager not installed");
    };
    if !manager.is_active(&session_id) {
        return error_response(StatusCode::BAD_REQUEST, "Unknown session ID");
    }

    manager.close_session(&session_id);
    StatusCode::OK.into_response()
}

#[async_trait]
impl ServerTransport for StreamableHttpServerTransport {
    async fn run(&self) -> Result<()> {
        self.inner.started.store(true, Ordering::SeqCst);

        let app = Router::new()
            .route(
                &self.inner.endpoint,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .with_state(self.inner.clone());

        let listener = match self.inner.listener.lock().await.take() {
            Some(listener) => listener,
            None => tokio::net::TcpListener::bind(&self.inner.addr).await.map_err(|e| {
                McpError::Transport(format!("failed to bind {}: {e}", self.inner.addr))
            })?,
        };

        tracing::info!(
            "starting mcp server at http://{}{}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.inner.addr.clone()),
            self.inner.endpoint
        );

        let stop = self.inner.stop_accepting.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;

        self.inner.run_done.cancel();
        serve.map_err(|e| McpError::Transport(format!("HTTP server failed: {e}")))
    }

    async fn send(&self, session_id: &str, msg: Vec<u8>) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(McpError::Transport("transport closed".into()));
        }
        let manager = self
            .inner
            .session_manager
            .read()
            .clone()
            .ok_or_else(|| McpError::Internal("session manager not set".into()))?;

        self.inner
            .sends
            .track_future(async move { manager.enqueue(session_id, msg).await })
            .await
    }

    fn set_receiver(&self, receiver: Arc<dyn ServerReceiver>) {
        *self.inner.receiver.write() = Some(receiver);
    }

    fn set_session_manager(&self, manager: Arc<SessionManager>) {
        *self.inner.session_manager.write() = Some(manager);
    }

    async fn shutdown(&self, server_done: CancellationToken, deadline: Duration) -> Result<()> {
        // stop accepting new HTTP requests
        self.inner.stop_accepting.cancel();

        let inner = self.inner.clone();
        let sequence = async move {
            // wait for dispatch to drain in-flight requests
            server_done.cancelled().await;

            // stop new sends, wait for in-flight ones
            inner.cancel.cancel();
            inner.sends.close();
            inner.sends.wait().await;

            // closing every session ends the open GET streams, which lets
            // the listener finish its graceful shutdown
            if let Some(manager) = inner.session_manager.read().clone() {
                manager.close_all_sessions();
            }

            if inner.started.load(Ordering::SeqCst) {
                inner.run_done.cancelled().await;
            }
        };

        tokio::time::timeout(deadline, sequence)
            .await
            .map_err(|_| McpError::Timeout("streamable http shutdown".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_without_run() {
        let transport = StreamableHttpServerTransport::new("127.0.0.1:0");
        transport.set_session_manager(Arc::new(SessionManager::new()));
        let done = CancellationToken::new();
        done.cancel();
        transport
            .shutdown(done, Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_after_shutdown_rejected() {
        let transport = StreamableHttpServerTransport::new("127.0.0.1:0");
        transport.set_session_manager(Arc::new(SessionManager::new()));
        let done = CancellationToken::new();
        done.cancel();
        transport
            .shutdown(done, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(transport.send("s", b"{}".to_vec()).await.is_err());
    }

    #[test]
    fn test_builder_options() {
        let transport = StreamableHttpServerTransport::new("127.0.0.1:0")
            .with_endpoint("/rpc")
            .with_state_mode(StateMode::Stateless);
        assert_eq!(transport.inner.endpoint, "/rpc");
        assert_eq!(transport.inner.state_mode, StateMode::Stateless);
    }
}
