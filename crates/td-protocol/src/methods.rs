//! MCP method names and protocol version negotiation

pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";

pub const PROMPTS_LIST: &str = "prompts/list";
pub const PROMPTS_GET: &str = "prompts/get";

pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
pub const RESOURCES_READ: &str = "resources/read";
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/listChanged";
pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/listChanged";
pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "notifications/resources/listChanged";
pub const NOTIFICATION_RESOURCES_UPDATED: &str = "notifications/resources/updated";

/// Latest protocol revision this runtime speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Revisions accepted during the handshake, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Server-side negotiation: echo the requested revision when we speak it,
/// otherwise answer with the latest and let the client decide.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}
