//! Per-method request handlers

use crate::context::RequestContext;
use crate::server::ServerInner;
use std::sync::Arc;
use td_protocol::methods;
use td_protocol::{
    CallToolRequest, GetPromptRequest, InitializeRequest, InitializeResult, JsonRpcRequest,
    ListPromptsRequest, ListPromptsResult, ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, PingResult, ReadResourceRequest, SubscribeRequest, SubscribeResult,
    UnsubscribeRequest, UnsubscribeResult,
};
use td_transport::ReceiveContext;
use td_types::{McpError, Result};

/// Route one validated request to its handler and marshal the result.
/// `context` is the prebuilt handler context carrying the cancellation
/// token already registered by the dispatch layer.
pub(crate) async fn dispatch_request(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
    request: &JsonRpcRequest,
    context: RequestContext,
) -> Result<serde_json::Value> {
    match request.method.as_str() {
        methods::PING => Ok(serde_json::to_value(PingResult::default())?),
        methods::INITIALIZE => {
            let result = handle_initialize(inner, ctx, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::PROMPTS_LIST => {
            let result = handle_list_prompts(inner, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::PROMPTS_GET => {
            let get: GetPromptRequest = request.params_as()?;
            let entry = inner
                .prompts
                .get(&get.name)
                .map(|e| e.value().clone())
                .ok_or_else(|| McpError::Internal(format!("prompt not found: {}", get.name)))?;
            let result = (entry.handler)(context, get).await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_LIST => {
            let result = handle_list_resources(inner, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_TEMPLATES_LIST => {
            let result = handle_list_resource_templates(inner, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_READ => {
            let read: ReadResourceRequest = request.params_as()?;
            let handler = resolve_resource_handler(inner, &read.uri)?;
            let result = (handler)(context, read).await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_SUBSCRIBE => {
            let result = handle_subscribe(inner, ctx, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_UNSUBSCRIBE => {
            let result = handle_unsubscribe(inner, ctx, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::TOOLS_LIST => {
            let result = handle_list_tools(inner, request.params_as()?)?;
            Ok(serde_json::to_value(result)?)
        }
        methods::TOOLS_CALL => {
            let call: CallToolRequest = request.params_as()?;
            let entry = inner
                .tools
                .get(&call.name)
                .map(|e| e.value().clone())
                .ok_or_else(|| McpError::Internal(format!("tool not found: {}", call.name)))?;
            let result = (entry.handler)(context, call).await?;
            Ok(serde_json::to_value(result)?)
        }
        other => Err(McpError::MethodNotSupport(format!("method={other}"))),
    }
}

/// First admissible request per session: capture peer identity, negotiate
/// the protocol revision, mint the session in stateful HTTP mode. A second
/// initialize on the same session is rejected.
fn handle_initialize(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
    request: InitializeRequest,
) -> Result<InitializeResult> {
    let session_id = match ctx.session_id.clone().filter(|s| !s.is_empty()) {
        Some(session_id) => session_id,
        None => {
            let session_id = inner.session_manager.create_session();
            if let Some(slot) = &ctx.new_session_id {
                let _ = slot.set(session_id.clone());
            }
            session_id
        }
    };

    let state = inner
        .session_manager
        .get(&session_id)
        .ok_or_else(|| McpError::LackSession(session_id.clone()))?;

    if state.init_request_received() {
        return Err(McpError::RequestInvalid(
            "duplicate initialize request".into(),
        ));
    }

    state.set_client_info(request.client_info, request.capabilities);
    state.set_init_request_received();

    Ok(InitializeResult {
        server_info: inner.server_info.clone(),
        capabilities: inner.capabilities.clone(),
        protocol_version: methods::negotiate_version(&request.protocol_version).to_string(),
        instructions: inner.instructions.clone(),
    })
}

fn handle_list_tools(inner: &Arc<ServerInner>, request: ListToolsRequest) -> Result<ListToolsResult> {
    let items = inner
        .tools
        .iter()
        .map(|e| (e.key().clone(), e.value().tool.clone()))
        .collect();
    let (tools, next_cursor) = paginate(items, request.cursor.as_deref(), inner.page_size);
    Ok(ListToolsResult { tools, next_cursor })
}

fn handle_list_prompts(
    inner: &Arc<ServerInner>,
    request: ListPromptsRequest,
) -> Result<ListPromptsResult> {
    let items = inner
        .prompts
        .iter()
        .map(|e| (e.key().clone(), e.value().prompt.clone()))
        .collect();
    let (prompts, next_cursor) = paginate(items, request.cursor.as_deref(), inner.page_size);
    Ok(ListPromptsResult {
        prompts,
        next_cursor,
    })
}

fn handle_list_resources(
    inner: &Arc<ServerInner>,
    request: ListResourcesRequest,
) -> Result<ListResourcesResult> {
    let items = inner
        .resources
        .iter()
        .map(|e| (e.key().clone(), e.value().resource.clone()))
        .collect();
    let (resources, next_cursor) = paginate(items, request.cursor.as_deref(), inner.page_size);
    Ok(ListResourcesResult {
        resources,
        next_cursor,
    })
}

fn handle_list_resource_templates(
    inner: &Arc<ServerInner>,
    request: ListResourceTemplatesRequest,
) -> Result<ListResourceTemplatesResult> {
    let items = inner
        .resource_templates
        .iter()
        .map(|e| (e.key().clone(), e.value().template.clone()))
        .collect();
    let (resource_templates, next_cursor) =
        paginate(items, request.cursor.as_deref(), inner.page_size);
    Ok(ListResourceTemplatesResult {
        resource_templates,
        next_cursor,
    })
}

fn resolve_resource_handler(
    inner: &Arc<ServerInner>,
    uri: &str,
) -> Result<crate::registry::ResourceHandler> {
    if let Some(entry) = inner.resources.get(uri) {
        return Ok(entry.value().handler.clone());
    }
    // fall back to templates; first matching template wins
    for entry in inner.resource_templates.iter() {
        if entry.value().compiled.matches(uri).is_some() {
            return Ok(entry.value().handler.clone());
        }
    }
    Err(McpError::Internal(format!("resource not found: {uri}")))
}

fn handle_subscribe(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
    request: SubscribeRequest,
) -> Result<SubscribeResult> {
    ensure_subscribe_capability(inner)?;
    let state = session_state(inner, ctx)?;
    state.subscribe_resource(request.uri);
    Ok(SubscribeResult::default())
}

fn handle_unsubscribe(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
    request: UnsubscribeRequest,
) -> Result<UnsubscribeResult> {
    ensure_subscribe_capability(inner)?;
    let state = session_state(inner, ctx)?;
    state.unsubscribe_resource(&request.uri);
    Ok(UnsubscribeResult::default())
}

fn ensure_subscribe_capability(inner: &Arc<ServerInner>) -> Result<()> {
    let supported = inner
        .capabilities
        .resources
        .as_ref()
        .map(|r| r.subscribe)
        .unwrap_or(false);
    if supported {
        Ok(())
    } else {
        Err(McpError::ServerNotSupport)
    }
}

fn session_state(
    inner: &Arc<ServerInner>,
    ctx: &ReceiveContext,
) -> Result<Arc<td_session::SessionState>> {
    let session_id = ctx
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| McpError::LackSession(String::new()))?;
    inner
        .session_manager
        .get(session_id)
        .ok_or_else(|| McpError::LackSession(session_id.to_string()))
}

/// Cursor pagination over a keyed snapshot: entries sort by key, the cursor
/// is the last key of the previous page, an empty next cursor marks the end.
fn paginate<T>(
    mut items: Vec<(String, T)>,
    cursor: Option<&str>,
    page_size: Option<usize>,
) -> (Vec<T>, Option<String>) {
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let start = match cursor {
        Some(cursor) if !cursor.is_empty() => items
            .iter()
            .position(|(key, _)| key.as_str() > cursor)
            .unwrap_or(items.len()),
        _ => 0,
    };
    let rest = items.split_off(start);

    match page_size {
        None => (rest.into_iter().map(|(_, v)| v).collect(), None),
        Some(page_size) => {
            let has_more = rest.len() > page_size;
            let page: Vec<(String, T)> = rest.into_iter().take(page_size).collect();
            let next_cursor = if has_more {
                page.last().map(|(key, _)| key.clone())
            } else {
                None
            };
            (page.into_iter().map(|(_, v)| v).collect(), next_cursor)
        }
    }
}
