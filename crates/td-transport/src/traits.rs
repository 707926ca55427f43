//! Transport contracts shared by every implementation

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use td_session::SessionManager;
use td_types::Result;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// HTTP header correlating streamable-HTTP requests with a session.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// One reply frame produced by the dispatch engine for a request; the
/// transport reads exactly one message from it.
pub type ReplyReceiver = oneshot::Receiver<Vec<u8>>;

/// Inbound callback installed on a client transport.
#[async_trait]
pub trait ClientReceiver: Send + Sync {
    async fn receive(&self, msg: &[u8]) -> Result<()>;
}

/// Request-scoped values a server transport hands to dispatch alongside the
/// raw frame. Cancellation never travels this way; a dropped connection is
/// not a cancel.
#[derive(Clone, Default)]
pub struct ReceiveContext {
    /// Session the frame belongs to; `None` before a session exists
    /// (the `initialize` POST in stateful streamable HTTP).
    pub session_id: Option<String>,

    /// Slot dispatch fills with the id of a session it creates while
    /// handling `initialize`; the transport echoes it in response headers.
    pub new_session_id: Option<Arc<OnceLock<String>>>,
}

impl ReceiveContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            new_session_id: None,
        }
    }
}

/// Inbound callback installed on a server transport.
///
/// `Ok(None)` means the frame was a notification or a response and no reply
/// frame will be produced; `Ok(Some(rx))` yields exactly one reply frame.
#[async_trait]
pub trait ServerReceiver: Send + Sync {
    async fn receive(&self, ctx: ReceiveContext, msg: &[u8]) -> Result<Option<ReplyReceiver>>;
}

/// Client side of a transport: one connection to one server.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Establish the channel. Not idempotent.
    async fn start(&self) -> Result<()>;

    /// Deliver one message; may suspend awaiting a write slot. Callers bound
    /// the wait with their own timeout.
    async fn send(&self, msg: Vec<u8>) -> Result<()>;

    fn set_receiver(&self, receiver: Arc<dyn ClientReceiver>);

    /// Release resources and wait for in-flight receive tasks.
    async fn close(&self) -> Result<()>;
}

/// Server side of a transport: many sessions behind one listener.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Synchronous serve loop; returns only after [`ServerTransport::shutdown`]
    /// completes.
    async fn run(&self) -> Result<()>;

    /// Route one message to a session's outbox.
    async fn send(&self, session_id: &str, msg: Vec<u8>) -> Result<()>;

    fn set_receiver(&self, receiver: Arc<dyn ServerReceiver>);

    fn set_session_manager(&self, manager: Arc<SessionManager>);

    /// Graceful shutdown: stop accepting new work, wait for `server_done`
    /// (signalled by dispatch once in-flight requests are drained), wait for
    /// in-flight sends, close all sessions, release the listener. The whole
    /// sequence is bounded by `deadline`.
    async fn shutdown(&self, server_done: CancellationToken, deadline: Duration) -> Result<()>;
}
