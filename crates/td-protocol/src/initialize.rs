//! Initialization handshake payloads
//!
//! `initialize` is the first request a client may send; the reply advertises
//! the server's identity and capabilities, and `notifications/initialized`
//! completes the handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Name and version of an MCP implementation, exchanged at handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities a client declares during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientCapabilities {
    /// Present (any value) when the client accepts `sampling/createMessage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Capabilities a server advertises in the `initialize` result.
///
/// An absent capability gates the corresponding list-change broadcast and
/// the subscription surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptsCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourcesCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub subscribe: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// First request on every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
}

/// Server reply to `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
}

/// Sent by the client once the `initialize` reply has been processed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializedNotification {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}
