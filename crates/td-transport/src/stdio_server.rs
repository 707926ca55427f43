//! stdio server transport
//!
//! Serves a single peer over the process's own stdin/stdout. One synthetic
//! session is assigned at startup; frames are newline-delimited.

use crate::traits::{ReceiveContext, ServerReceiver, ServerTransport};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use td_session::SessionManager;
use td_types::{McpError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct StdioServerTransport {
    receiver: RwLock<Option<Arc<dyn ServerReceiver>>>,
    session_manager: RwLock<Option<Arc<SessionManager>>>,
    session_id: RwLock<Option<String>>,

    stdout: Arc<Mutex<tokio::io::Stdout>>,

    cancel: CancellationToken,
    receive_done: CancellationToken,
}

impl StdioServerTransport {
    pub fn new() -> Self {
        Self {
            receiver: RwLock::new(None),
            session_manager: RwLock::new(None),
            session_id: RwLock::new(None),
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
            cancel: CancellationToken::new(),
            receive_done: CancellationToken::new(),
        }
    }

    async fn write_frame(stdout: &Mutex<tokio::io::Stdout>, mut msg: Vec<u8>) -> Result<()> {
        msg.push(b'\n');
        let mut out = stdout.lock().await;
        out.write_all(&msg)
            .await
            .map_err(|e| McpError::Transport(format!("failed to write stdout: {e}")))?;
        out.flush()
            .await
            .map_err(|e| McpError::Transport(format!("failed to flush stdout: {e}")))?;
        Ok(())
    }

    async fn handle_line(&self, session_id: &str, line: &[u8]) {
        let receiver = self.receiver.read().clone();
        let Some(receiver) = receiver else {
            tracing::warn!("stdio server: no receiver installed, frame dropped");
            return;
        };

        let reply = match receiver
            .receive(ReceiveContext::for_session(session_id), line)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("stdio server receiver failed: {}", e);
                return;
            }
        };

        let Some(reply) = reply else {
            return;
        };

        let stdout = self.stdout.clone();
        tokio::spawn(async move {
            match reply.await {
                Ok(msg) if !msg.is_empty() => {
                    if let Err(e) = Self::write_frame(&stdout, msg).await {
                        tracing::error!("failed to send reply: {}", e);
                    }
                }
                _ => tracing::error!("handle request fail"),
            }
        });
    }
}

impl Default for StdioServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerTransport for StdioServerTransport {
    async fn run(&self) -> Result<()> {
        let manager = self
            .session_manager
            .read()
            .clone()
            .ok_or_else(|| McpError::Internal("session manager not set".into()))?;

        let session_id = manager.create_session();
        *self.session_id.write() = Some(session_id.clone());

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = reader.read_line(&mut line) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        self.handle_line(&session_id, trimmed.as_bytes()).await;
                    }
                    Err(e) => {
                        tracing::error!("stdio server: unexpected error reading input: {}", e);
                        break;
                    }
                },
            }
        }

        self.receive_done.cancel();
        Ok(())
    }

    async fn send(&self, _session_id: &str, msg: Vec<u8>) -> Result<()> {
        Self::write_frame(&self.stdout, msg).await
    }

    fn set_receiver(&self, receiver: Arc<dyn ServerReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    fn set_session_manager(&self, manager: Arc<SessionManager>) {
        *self.session_manager.write() = Some(manager);
    }

    async fn shutdown(&self, server_done: CancellationToken, deadline: Duration) -> Result<()> {
        self.cancel.cancel();

        let result = tokio::time::timeout(deadline, async {
            tokio::select! {
                _ = self.receive_done.cancelled() => {}
                _ = server_done.cancelled() => {}
            }
        })
        .await;

        if let Some(manager) = self.session_manager.read().clone() {
            manager.close_all_sessions();
        }

        result.map_err(|_| McpError::Timeout("stdio server shutdown".into()))
    }
}
