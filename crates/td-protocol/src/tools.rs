//! Tool discovery and invocation payloads

use crate::content::Content;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use td_types::{McpError, Result};

/// A tool the server exposes through `tools/list` / `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// Unique identifier within the registry.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// JSON Schema describing a tool's arguments.
///
/// Either the structured object form or an opaque pre-built schema; the raw
/// form exists for schemas produced outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputSchema {
    Object(ObjectSchema),
    Raw(Value),
}

impl InputSchema {
    /// An `object` schema with no declared properties.
    pub fn empty_object() -> Self {
        InputSchema::Object(ObjectSchema::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Default for ObjectSchema {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: None,
            required: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, Value>>,
}

impl CallToolRequest {
    pub fn new(name: impl Into<String>, arguments: HashMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments: Some(arguments),
        }
    }

    /// Redecode the argument map into a handler-specific shape.
    pub fn arguments_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.arguments {
            Some(map) => serde_json::to_value(map)?,
            None => Value::Null,
        };
        serde_json::from_value(value).map_err(McpError::Serialization)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolListChangedNotification {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_serializes_input_schema() {
        let tool = Tool::new("echo", "echo back", InputSchema::empty_object());
        let v = serde_json::to_value(&tool).unwrap();
        assert_eq!(v["inputSchema"]["type"], "object");
        assert_eq!(v["name"], "echo");
    }

    #[test]
    fn test_raw_schema_passthrough() {
        let raw = json!({"type": "object", "properties": {"x": {"type": "string"}}, "additionalProperties": false});
        let tool = Tool {
            name: "t".into(),
            description: None,
            input_schema: InputSchema::Raw(raw.clone()),
        };
        let v = serde_json::to_value(&tool).unwrap();
        assert_eq!(v["inputSchema"], raw);
    }

    #[test]
    fn test_call_tool_request_typed_arguments() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct EchoArgs {
            x: String,
        }

        let req: CallToolRequest =
            serde_json::from_value(json!({"name": "echo", "arguments": {"x": "hi"}})).unwrap();
        let args: EchoArgs = req.arguments_as().unwrap();
        assert_eq!(args, EchoArgs { x: "hi".into() });
    }

    #[test]
    fn test_call_tool_result_text_shape() {
        let result = CallToolResult::text("hi");
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v, json!({"content": [{"type": "text", "text": "hi"}]}));
    }

    #[test]
    fn test_list_tools_result_cursor() {
        let result = ListToolsResult {
            tools: vec![],
            next_cursor: None,
        };
        let v = serde_json::to_value(&result).unwrap();
        assert!(v.get("nextCursor").is_none());
    }
}
