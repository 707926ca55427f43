//! stdio client transport
//!
//! Spawns the server as a subprocess and exchanges newline-delimited
//! JSON-RPC frames over its stdin/stdout. A dedicated task reads stdout
//! line-by-line; empty and whitespace-only lines are skipped.

use crate::traits::{ClientReceiver, ClientTransport};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use td_types::{McpError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct StdioClientTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,

    child: Arc<RwLock<Option<Child>>>,

    /// Mutex rather than RwLock so concurrent senders serialize on the pipe.
    stdin: Arc<Mutex<Option<ChildStdin>>>,

    receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,

    reader_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl StdioClientTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            child: Arc::new(RwLock::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            receiver: Arc::new(RwLock::new(None)),
            reader_task: Arc::new(RwLock::new(None)),
        }
    }

    /// Add environment variables for the subprocess.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn start_stdout_reader(
        stdout: ChildStdout,
        receiver: Arc<RwLock<Option<Arc<dyn ClientReceiver>>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::info!("stdio transport: subprocess stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            tracing::debug!("skipping empty message");
                            continue;
                        }
                        let receiver = receiver.read().clone();
                        match receiver {
                            Some(receiver) => {
                                if let Err(e) = receiver.receive(trimmed.as_bytes()).await {
                                    tracing::error!("stdio receiver failed: {}", e);
                                }
                            }
                            None => {
                                tracing::warn!("stdio transport: no receiver installed, frame dropped");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("error reading subprocess stdout: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ClientTransport for StdioClientTransport {
    async fn start(&self) -> Result<()> {
        tracing::info!("spawning stdio MCP process: {} {:?}", self.command, self.args);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                McpError::Transport(format!("failed to spawn process '{}': {e}", self.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture subprocess stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture subprocess stdout".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.write() = Some(child);
        *self.reader_task.write() = Some(Self::start_stdout_reader(
            stdout,
            self.receiver.clone(),
        ));
        Ok(())
    }

    async fn send(&self, mut msg: Vec<u8>) -> Result<()> {
        msg.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdin not available".into()))?;
        stdin
            .write_all(&msg)
            .await
            .map_err(|e| McpError::Transport(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("failed to flush stdin: {e}")))?;
        Ok(())
    }

    fn set_receiver(&self, receiver: Arc<dyn ClientReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    /// Cancel the reader task, close the writer, then wait for the
    /// subprocess to exit.
    async fn close(&self) -> Result<()> {
        if let Some(task) = self.reader_task.write().take() {
            task.abort();
        }

        *self.stdin.lock().await = None;

        let child = self.child.write().take();
        if let Some(mut child) = child {
            child
                .wait()
                .await
                .map_err(|e| McpError::Transport(format!("failed to wait for subprocess: {e}")))?;
        }
        Ok(())
    }
}
