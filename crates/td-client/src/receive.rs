//! Client-side inbound dispatch
//!
//! Classifies every frame from the transport as a request (served by a
//! detached task so a slow sampling handler never blocks the read loop), a
//! response (delivered to the awaiting call slot) or a notification.

use crate::client::ClientInner;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::sync::Arc;
use td_protocol::methods;
use td_protocol::{
    classify, request_id_key, CancelledNotification, CreateMessageRequest, FrameKind,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PingResult, INTERNAL_ERROR,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use td_transport::ClientReceiver;
use td_types::{McpError, Result};

pub(crate) struct ReceiverAdapter {
    inner: Arc<ClientInner>,
}

impl ReceiverAdapter {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ClientReceiver for ReceiverAdapter {
    async fn receive(&self, msg: &[u8]) -> Result<()> {
        match classify(msg)? {
            FrameKind::Notification => {
                let notify: JsonRpcNotification = serde_json::from_slice(msg)?;
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let method = notify.method.clone();
                    if let Err(e) = handle_notify(&inner, notify).await {
                        tracing::error!("receive notify method={} error: {}", method, e);
                    }
                });
                Ok(())
            }
            FrameKind::Response => {
                let response: JsonRpcResponse = serde_json::from_slice(msg)?;
                let key = request_id_key(&response.id);
                if let Err(e) = self.inner.pending.deliver(&key, response) {
                    tracing::error!("receive response id={} error: {}", key, e);
                }
                Ok(())
            }
            FrameKind::Request => {
                let request: JsonRpcRequest = serde_json::from_slice(msg)?;
                if !request.is_valid() {
                    return Err(McpError::RequestInvalid(format!(
                        "method={}",
                        request.method
                    )));
                }
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let method = request.method.clone();
                    let task = handle_request(&inner, request);
                    match std::panic::AssertUnwindSafe(task).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!("receive request method={} error: {}", method, e)
                        }
                        Err(panic) => {
                            tracing::error!("panic in request handler method={}: {:?}", method, panic)
                        }
                    }
                });
                Ok(())
            }
        }
    }
}

async fn handle_request(inner: &Arc<ClientInner>, request: JsonRpcRequest) -> Result<()> {
    let id = request.id.clone().unwrap_or(serde_json::Value::Null);

    let result: Result<serde_json::Value> = match request.method.as_str() {
        methods::PING => Ok(serde_json::to_value(PingResult::default())?),
        methods::SAMPLING_CREATE_MESSAGE => sample(inner, &request).await,
        other => Err(McpError::MethodNotSupport(format!("method={other}"))),
    };

    match result {
        Ok(value) => inner.send_response(id, &value).await,
        Err(e) => {
            let code = error_code(&e);
            inner.send_error_response(id, code, e.to_string()).await
        }
    }
}

async fn sample(inner: &Arc<ClientInner>, request: &JsonRpcRequest) -> Result<serde_json::Value> {
    if inner.client_capabilities.sampling.is_none() {
        return Err(McpError::ClientNotSupport);
    }
    let handler = inner
        .sampling_handler
        .clone()
        .ok_or(McpError::ClientNotSupport)?;

    let create: CreateMessageRequest = request.params_as()?;

    // register for explicit cancellation while the handler runs
    let id = request
        .id
        .clone()
        .ok_or_else(|| McpError::RequestInvalid("missing request id".into()))?;
    let key = request_id_key(&id);
    let token = inner.cancellations.register(key.clone());
    let result = handler.create_message(token, create).await;
    inner.cancellations.remove(&key);

    Ok(serde_json::to_value(result?)?)
}

async fn handle_notify(inner: &Arc<ClientInner>, notify: JsonRpcNotification) -> Result<()> {
    match notify.method.as_str() {
        methods::NOTIFICATION_CANCELLED => {
            let cancelled: CancelledNotification = notify.params_as()?;
            let key = request_id_key(&cancelled.request_id);
            if !inner.cancellations.cancel(&key) {
                tracing::debug!("cancellation for unknown request id={}", key);
            }
            Ok(())
        }
        methods::NOTIFICATION_TOOLS_LIST_CHANGED => {
            inner
                .notify_handler
                .tools_list_changed(notify.params_as()?)
                .await
        }
        methods::NOTIFICATION_PROMPTS_LIST_CHANGED => {
            inner
                .notify_handler
                .prompts_list_changed(notify.params_as()?)
                .await
        }
        methods::NOTIFICATION_RESOURCES_LIST_CHANGED => {
            inner
                .notify_handler
                .resources_list_changed(notify.params_as()?)
                .await
        }
        methods::NOTIFICATION_RESOURCES_UPDATED => {
            inner
                .notify_handler
                .resources_updated(notify.params_as()?)
                .await
        }
        methods::NOTIFICATION_PROGRESS => inner.notify_handler.progress(notify.params_as()?).await,
        other => Err(McpError::MethodNotSupport(format!("method={other}"))),
    }
}

fn error_code(err: &McpError) -> i64 {
    match err {
        McpError::MethodNotSupport(_) => METHOD_NOT_FOUND,
        McpError::RequestInvalid(_) => INVALID_REQUEST,
        McpError::Serialization(_) => PARSE_ERROR,
        _ => INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            error_code(&McpError::MethodNotSupport("m".into())),
            METHOD_NOT_FOUND
        );
        assert_eq!(
            error_code(&McpError::RequestInvalid("r".into())),
            INVALID_REQUEST
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(error_code(&McpError::Serialization(json_err)), PARSE_ERROR);
        assert_eq!(error_code(&McpError::ClientNotSupport), INTERNAL_ERROR);
    }
}
