//! MCP client runtime
//!
//! Wraps a [`td_transport::ClientTransport`] with the dispatch engine:
//! inbound frames are classified as requests (ping, sampling), responses
//! (correlated back to the awaiting call) or notifications (fanned out to
//! the installed handler). The client drives the initialization handshake,
//! re-runs it when the server reports the session closed, and probes the
//! server with a periodic ping.

mod client;
mod handlers;
mod receive;

pub use client::{Client, ClientBuilder};
pub use handlers::{LoggingNotifyHandler, NotifyHandler, SamplingHandler};
