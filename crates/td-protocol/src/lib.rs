//! MCP protocol types: the JSON-RPC 2.0 envelope and every payload shape
//! exchanged between tandem clients and servers.
//!
//! Envelopes keep the raw parameter/result bytes next to the decoded value so
//! dispatch can classify a frame without committing to a handler-specific
//! schema; handlers redecode the raw bytes into their own types on demand.

pub mod content;
pub mod initialize;
pub mod jsonrpc;
pub mod methods;
pub mod notifications;
pub mod ping;
pub mod prompts;
pub mod resources;
pub mod sampling;
pub mod tools;

pub use content::{Content, ResourceContents, Role};
pub use initialize::{
    ClientCapabilities, Implementation, InitializeRequest, InitializeResult,
    InitializedNotification, PromptsCapability, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};
pub use jsonrpc::{
    classify, request_id_key, FrameKind, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use resources::CompiledTemplate;
pub use notifications::{CancelledNotification, ProgressNotification};
pub use ping::{PingRequest, PingResult};
pub use prompts::{
    GetPromptRequest, GetPromptResult, ListPromptsRequest, ListPromptsResult, Prompt,
    PromptArgument, PromptListChangedNotification, PromptMessage,
};
pub use resources::{
    ListResourceTemplatesRequest, ListResourceTemplatesResult, ListResourcesRequest,
    ListResourcesResult, ReadResourceRequest, ReadResourceResult, Resource,
    ResourceListChangedNotification, ResourceTemplate, ResourceUpdatedNotification,
    SubscribeRequest, SubscribeResult, UnsubscribeRequest, UnsubscribeResult,
};
pub use sampling::{
    CreateMessageRequest, CreateMessageResult, ModelHint, ModelPreferences, SamplingMessage,
};
pub use tools::{
    CallToolRequest, CallToolResult, InputSchema, ListToolsRequest, ListToolsResult, ObjectSchema,
    Tool, ToolListChangedNotification,
};
