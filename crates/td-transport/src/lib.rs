//! Transport layer for the tandem MCP runtime
//!
//! A transport moves opaque JSON-RPC frames between peers; it never inspects
//! method names. Client transports expose `start/send/close` with an inbound
//! receiver callback; server transports expose `run/send/shutdown`, route
//! outbound frames through the session outbox, and hand inbound frames (plus
//! the session id) to the dispatch engine.
//!
//! Implementations:
//! - stdio: newline-delimited frames over a child process's std streams
//!   (client) or the process's own stdin/stdout (server)
//! - SSE client: GET event stream plus a POST endpoint announced via the
//!   `endpoint` event
//! - streamable HTTP: one endpoint multiplexing POST (request/response),
//!   GET (server-push SSE) and DELETE (session termination)

pub mod sse;
pub mod sse_client;
pub mod stdio_client;
pub mod stdio_server;
pub mod streamable_client;
pub mod streamable_server;
mod traits;

pub use sse::{SseEvent, SseParser};
pub use sse_client::SseClientTransport;
pub use stdio_client::StdioClientTransport;
pub use stdio_server::StdioServerTransport;
pub use streamable_client::StreamableHttpClientTransport;
pub use streamable_server::{StateMode, StreamableHttpServerTransport};
pub use traits::{
    ClientReceiver, ClientTransport, ReceiveContext, ReplyReceiver, ServerReceiver,
    ServerTransport, SESSION_ID_HEADER,
};
