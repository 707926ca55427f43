//! MCP server runtime
//!
//! Applications register tools, prompts and resources against a [`Server`];
//! the dispatch engine classifies every inbound frame, polices the
//! initialization handshake, runs request handlers on detached tasks (a
//! dropped connection never aborts one) and correlates replies for calls the
//! server itself makes to the client (`ping`, `sampling/createMessage`).
//! Registry mutations broadcast `*ListChanged` notifications to every active
//! session.

mod context;
mod handle;
mod receive;
mod registry;
mod server;

pub use context::RequestContext;
pub use registry::{PromptHandler, ResourceHandler, ToolHandler};
pub use server::{Server, ServerBuilder};
