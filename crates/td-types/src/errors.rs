//! Error types and conversions

use thiserror::Error;

/// Structured error carried by a JSON-RPC error response.
///
/// Returned from the peer-call facade when the other side answers a request
/// with `{code, message, data}` instead of a result.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("code={code} message={message} data={data:?}")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

#[derive(Error, Debug)]
pub enum McpError {
    #[error("this feature client not support")]
    ClientNotSupport,

    #[error("this feature server not support")]
    ServerNotSupport,

    #[error("request invalid: {0}")]
    RequestInvalid(String),

    #[error("lack response chan: {0}")]
    LackResponseChannel(String),

    #[error("duplicate response received: {0}")]
    DuplicateResponse(String),

    #[error("method not support: {0}")]
    MethodNotSupport(String),

    #[error("the session has not been initialized")]
    SessionHasNotInitialized,

    #[error("lack session: {0}")]
    LackSession(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("send EOF")]
    SendEof,

    #[error("message queue has not been opened")]
    QueueNotOpened,

    #[error("client not ready")]
    NotReady,

    #[error("server already shutdown")]
    ShuttingDown,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("response error: {0}")]
    Response(#[from] ResponseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, McpError>;

impl McpError {
    /// True when the error means the server no longer knows our session and a
    /// fresh handshake is required.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, McpError::SessionClosed(_))
    }
}
