//! Application-facing handler traits for server-initiated traffic

use async_trait::async_trait;
use td_protocol::{
    CreateMessageRequest, CreateMessageResult, ProgressNotification,
    PromptListChangedNotification, ResourceListChangedNotification, ResourceUpdatedNotification,
    ToolListChangedNotification,
};
use td_types::Result;
use tokio_util::sync::CancellationToken;

/// Handles `sampling/createMessage` requests from the server.
///
/// Installing one advertises the sampling capability during the handshake.
/// `cancel` trips when the server sends `notifications/cancelled` for the
/// request; long completions should watch it.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(
        &self,
        cancel: CancellationToken,
        request: CreateMessageRequest,
    ) -> Result<CreateMessageResult>;
}

/// Handles server-originated notifications.
///
/// Every method has a logging default, so implementations override only what
/// they care about. Handler failures are logged and never reported to the
/// server.
#[async_trait]
pub trait NotifyHandler: Send + Sync {
    async fn tools_list_changed(&self, _notify: ToolListChangedNotification) -> Result<()> {
        tracing::info!("receive notify: method=notifications/tools/listChanged");
        Ok(())
    }

    async fn prompts_list_changed(&self, _notify: PromptListChangedNotification) -> Result<()> {
        tracing::info!("receive notify: method=notifications/prompts/listChanged");
        Ok(())
    }

    async fn resources_list_changed(&self, _notify: ResourceListChangedNotification) -> Result<()> {
        tracing::info!("receive notify: method=notifications/resources/listChanged");
        Ok(())
    }

    async fn resources_updated(&self, notify: ResourceUpdatedNotification) -> Result<()> {
        tracing::info!(
            "receive notify: method=notifications/resources/updated, uri={}",
            notify.uri
        );
        Ok(())
    }

    async fn progress(&self, notify: ProgressNotification) -> Result<()> {
        tracing::info!(
            "receive notify: method=notifications/progress, progress={}",
            notify.progress
        );
        Ok(())
    }
}

/// Default notification handler: logs every notification and moves on.
pub struct LoggingNotifyHandler;

#[async_trait]
impl NotifyHandler for LoggingNotifyHandler {}
