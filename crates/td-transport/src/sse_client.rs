//! SSE client transport (two-URL protocol)
//!
//! The client opens `GET serverURL` with `Accept: text/event-stream` and
//! blocks until the first `endpoint` event announces the POST URL for
//! outbound messages. Subsequent `message` events are handed to the receiver
//! under a per-event timeout.

use crate::sse::SseParser;
use crate::traits::{ClientReceiver, ClientTransport};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use td_types::{McpError, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

const ENDPOINT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SseClientTransport {
    server_url: Url,
    client: reqwest::Client,

    receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
    message_endpoint: Arc<RwLock<Option<Url>>>,

    receive_timeout: Duration,

    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SseClientTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let server_url = Url::parse(server_url)
            .map_err(|e| McpError::Transport(format!("failed to parse server URL: {e}")))?;
        Ok(Self {
            server_url,
            client: reqwest::Client::new(),
            receiver: Arc::new(RwLock::new(None)),
            message_endpoint: Arc::new(RwLock::new(None)),
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

    async fn read_stream(
        response: reqwest::Response,
        server_url: Url,
        message_endpoint: Arc<RwLock<Option<Url>>>,
        receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
        receive_timeout: Duration,
        endpoint_tx: oneshot::Sender<Result<()>>,
        cancel: CancellationToken,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    tracing::error!("SSE stream error: {}", e);
                    return;
                }
                None => return,
            };

            for event in parser.feed(&chunk) {
                match event.event.as_str() {
                    "endpoint" => {
                        match server_url.join(&event.data) {
                            Ok(endpoint) => {
                                tracing::debug!("received endpoint: {}", endpoint);
                                *message_endpoint.write() = Some(endpoint);
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(Ok(()));
                                }
                            }
                            Err(e) => {
                                tracing::error!("error parsing endpoint URL: {}", e);
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(Err(McpError::Transport(format!(
                                        "invalid endpoint event: {e}"
                                    ))));
                                }
                            }
                        }
                    }
                    "message" => {
                        let receiver = receiver.read().clone();
                        let Some(receiver) = receiver else {
                            tracing::warn!("SSE client: no receiver installed, event dropped");
                            continue;
                        };
                        let delivery =
                            tokio::time::timeout(receive_timeout, receiver.receive(event.data.as_bytes()))
                                .await;
                        match delivery {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::error!("error receive message: {}", e),
                            Err(_) => tracing::error!("receive timeout for SSE event"),
                        }
                    }
                    other => tracing::debug!("ignoring SSE event type: {}", other),
                }
            }
        }
    }
}

#[async_trait]
impl ClientTransport for SseClientTransport {
    async fn start(&self) -> Result<()> {
        let response = self
            .client
            .get(self.server_url.clone())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("failed to connect to SSE stream: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        self.tasks.spawn(Self::read_stream(
            response,
            self.server_url.clone(),
            self.message_endpoint.clone(),
            self.receiver.clone(),
            self.receive_timeout,
            endpoint_tx,
            self.cancel.clone(),
        ));

        match tokio::time::timeout(ENDPOINT_WAIT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Transport(
                "SSE stream ended before endpoint event".into(),
            )),
            Err(_) => Err(McpError::Timeout("waiting for endpoint".into())),
        }
    }

    async fn send(&self, msg: Vec<u8>) -> Result<()> {
        let endpoint = self
            .message_endpoint
            .read()
            .clone()
            .ok_or_else(|| McpError::Transport("message endpoint not established".into()))?;

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .body(msg)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("failed to send message: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn set_receiver(&self, receiver: Arc<dyn ClientReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(SseClientTransport::new("not a url").is_err());
    }

    #[test]
    fn test_endpoint_resolution_against_server_url() {
        let base = Url::parse("http://localhost:3000/sse").unwrap();
        let resolved = base.join("/messages?session=1").unwrap();
        assert_eq!(resolved.as_str(), "http://localhost:3000/messages?session=1");
    }
}
