//! Shared error types for the tandem MCP runtime

pub mod errors;

pub use errors::{McpError, ResponseError, Result};
