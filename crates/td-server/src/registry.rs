//! Handler registries
//!
//! Four keyed maps bind descriptors to handler closures: tools by name,
//! prompts by name, resources by URI, resource templates by URI template.
//! Re-registration replaces, deregistration is idempotent.

use crate::context::RequestContext;
use futures::future::BoxFuture;
use std::sync::Arc;
use td_protocol::{
    CallToolRequest, CallToolResult, CompiledTemplate, GetPromptRequest, GetPromptResult, Prompt,
    ReadResourceRequest, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use td_types::Result;

pub type ToolHandler = Arc<
    dyn Fn(RequestContext, CallToolRequest) -> BoxFuture<'static, Result<CallToolResult>>
        + Send
        + Sync,
>;

pub type PromptHandler = Arc<
    dyn Fn(RequestContext, GetPromptRequest) -> BoxFuture<'static, Result<GetPromptResult>>
        + Send
        + Sync,
>;

pub type ResourceHandler = Arc<
    dyn Fn(RequestContext, ReadResourceRequest) -> BoxFuture<'static, Result<ReadResourceResult>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub(crate) struct ToolEntry {
    pub(crate) tool: Tool,
    pub(crate) handler: ToolHandler,
}

#[derive(Clone)]
pub(crate) struct PromptEntry {
    pub(crate) prompt: Prompt,
    pub(crate) handler: PromptHandler,
}

#[derive(Clone)]
pub(crate) struct ResourceEntry {
    pub(crate) resource: Resource,
    pub(crate) handler: ResourceHandler,
}

#[derive(Clone)]
pub(crate) struct TemplateEntry {
    pub(crate) template: ResourceTemplate,
    pub(crate) compiled: Arc<CompiledTemplate>,
    pub(crate) handler: ResourceHandler,
}
