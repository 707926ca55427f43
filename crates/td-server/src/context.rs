//! Request-scoped context handed to handlers
//!
//! Carries the values the transport context would have carried (session id,
//! request id) plus the peer-call facade and the explicit cancellation
//! token. The token trips only on an inbound `notifications/cancelled`;
//! transport disconnects never reach it.

use crate::server::ServerInner;
use serde_json::Value;
use std::sync::Arc;
use td_protocol::methods;
use td_protocol::{
    CreateMessageRequest, CreateMessageResult, PingRequest, PingResult, ProgressNotification,
    RequestId,
};
use td_types::{McpError, Result};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RequestContext {
    pub(crate) session_id: String,
    pub(crate) request_id: RequestId,
    pub(crate) cancel: CancellationToken,
    pub(crate) server: Arc<ServerInner>,
}

impl RequestContext {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// True once the peer sent `notifications/cancelled` for this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspends until the request is cancelled; long handlers race this
    /// against their own work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Heartbeat the client behind this session.
    pub async fn ping(&self) -> Result<PingResult> {
        let raw = self
            .server
            .call_client(&self.session_id, methods::PING, &PingRequest::default())
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Ask the client to run an LLM completion. Requires the client to have
    /// advertised the sampling capability at handshake.
    pub async fn sampling(&self, request: CreateMessageRequest) -> Result<CreateMessageResult> {
        let state = self
            .server
            .session_manager
            .get(&self.session_id)
            .ok_or_else(|| McpError::LackSession(self.session_id.clone()))?;

        let supports_sampling = state
            .client_capabilities()
            .map(|caps| caps.sampling.is_some())
            .unwrap_or(false);
        if !supports_sampling {
            return Err(McpError::ServerNotSupport);
        }

        let raw = self
            .server
            .call_client(&self.session_id, methods::SAMPLING_CREATE_MESSAGE, &request)
            .await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Report progress for this request over the session's push channel.
    pub async fn notify_progress(&self, progress: f64, total: Option<f64>) -> Result<()> {
        let notify = ProgressNotification {
            progress_token: progress_token_of(&self.request_id),
            progress,
            total,
        };
        self.server
            .send_notification(&self.session_id, methods::NOTIFICATION_PROGRESS, &notify)
            .await
    }
}

fn progress_token_of(request_id: &RequestId) -> Value {
    request_id.clone()
}
