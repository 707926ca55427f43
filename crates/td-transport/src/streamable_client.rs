//! Streamable-HTTP client transport
//!
//! All traffic goes to one server endpoint. POST carries outbound frames and
//! yields either an immediate JSON reply, `202 Accepted`, or an SSE-upgraded
//! body; a long-lived GET stream carries server-initiated frames once the
//! handshake has produced a session id; DELETE terminates the session on
//! close.

use crate::sse::SseParser;
use crate::traits::{ClientReceiver, ClientTransport, SESSION_ID_HEADER};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

const STREAM_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct StreamableHttpClientTransport {
    server_url: Url,
    client: reqwest::Client,

    receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
    session_id: Arc<RwLock<Option<String>>>,

    receive_timeout: Duration,

    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl StreamableHttpClientTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let server_url = Url::parse(server_url)
            .map_err(|e| McpError::Transport(format!("failed to parse server URL: {e}")))?;
        Ok(Self {
            server_url,
            client: reqwest::Client::new(),
            receiver: Arc::new(RwLock::new(None)),
            session_id: Arc::new(RwLock::new(None)),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Per-event deadline for the receiver callback.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Deliver one inbound frame to the receiver under the event timeout.
    async fn deliver(
        receiver: &RwLock<Option<Arc<dyn ClientReceiver>>>,
        receive_timeout: Duration,
        payload: &[u8],
    ) {
        let receiver = receiver.read().clone();
        let Some(receiver) = receiver else {
            tracing::warn!("streamable client: no receiver installed, frame dropped");
            return;
        };
        match tokio::time::timeout(receive_timeout, receiver.receive(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("error processing inbound frame: {}", e),
            Err(_) => tracing::error!("receive timeout for inbound frame"),
        }
    }

    /// Drain one SSE body, delivering each `data:` payload.
    async fn consume_sse_body(
        response: reqwest::Response,
        receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
        receive_timeout: Duration,
        cancel: CancellationToken,
    ) {
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    for event in parser.feed(&chunk) {
                        Self::deliver(&receiver, receive_timeout, event.data.as_bytes()).await;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("SSE stream error: {}", e);
                    return;
                }
                None => {
                    if let Some(event) = parser.finish() {
                        Self::deliver(&receiver, receive_timeout, event.data.as_bytes()).await;
                    }
                    return;
                }
            }
        }
    }

    /// GET-stream loop: retry every second until a session id exists, then
    /// hold the server-push stream open, reconnecting on EOF. `405` means
    /// the server is stateless and ends the loop; `404` waits for a fresh
    /// handshake.
    async fn run_get_stream(
        server_url: Url,
        client: reqwest::Client,
        session_id: Arc<RwLock<Option<String>>>,
        receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
        receive_timeout: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(STREAM_RETRY_INTERVAL) => {}
            }

            let Some(current_session) = session_id.read().clone() else {
                // waiting for the initialize POST to produce a session id
                continue;
            };

            let response = client
                .get(server_url.clone())
                .header("Accept", "text/event-stream")
                .header(SESSION_ID_HEADER, current_session.as_str())
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("failed to connect to SSE stream: {}", e);
                    continue;
                }
            };

            match response.status() {
                status if status.is_success() => {
                    Self::consume_sse_body(
                        response,
                        receiver.clone(),
                        receive_timeout,
                        cancel.clone(),
                    )
                    .await;
                }
                StatusCode::METHOD_NOT_ALLOWED => {
                    tracing::info!("server does not support SSE streaming");
                    return;
                }
                StatusCode::NOT_FOUND => {
                    tracing::info!("session closed, awaiting fresh handshake");
                    continue;
                }
                status => {
                    tracing::info!("unexpected status code on GET stream: {}", status);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ClientTransport for StreamableHttpClientTransport {
    async fn start(&self) -> Result<()> {
        self.tasks.spawn(Self::run_get_stream(
            self.server_url.clone(),
            self.client.clone(),
            self.session_id.clone(),
            self.receiver.clone(),
            self.receive_timeout,
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn send(&self, msg: Vec<u8>) -> Result<()> {
        let mut request = self
            .client
            .post(self.server_url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(msg);

        let sent_session = self.session_id.read().clone();
        if let Some(session) = &sent_session {
            request = request.header(SESSION_ID_HEADER, session.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("failed to send message: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            if let Some(session) = sent_session.filter(|_| status == StatusCode::NOT_FOUND) {
                // the server no longer knows this session; forget it so the
                // re-handshake starts clean
                *self.session_id.write() = None;
                return Err(McpError::SessionClosed(session));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "unexpected status code: {status}, body={body}"
            )));
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            // the POST was upgraded to a streamed response
            self.tasks.spawn(Self::consume_sse_body(
                response,
                self.receiver.clone(),
                self.receive_timeout,
                self.cancel.clone(),
            ));
            return Ok(());
        }

        if content_type.starts_with("application/json") {
            let body = response
                .bytes()
                .await
                .map_err(|e| McpError::Transport(format!("failed to read response body: {e}")))?;
            Self::deliver(&self.receiver, self.receive_timeout, &body).await;
            return Ok(());
        }

        Err(McpError::Transport(format!(
            "unexpected content type: {content_type}"
        )))
    }

    fn set_receiver(&self, receiver: Arc<dyn ClientReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let session_id = self.session_id.read().clone();
        if let Some(session) = session_id {
            let response = self
                .client
                .delete(self.server_url.clone())
                .header(SESSION_ID_HEADER, session.as_str())
                .send()
                .await
                .map_err(|e| McpError::Transport(format!("failed to send DELETE: {e}")))?;
            tracing::debug!("session delete returned {}", response.status());
        }
        Ok(())
    }
}
