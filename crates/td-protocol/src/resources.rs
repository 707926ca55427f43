//! Resource discovery, fetch, templates and change subscriptions
//!
//! URI templates (`file:///{path}`) compile to anchored regexes with one
//! named capture per variable; compilation happens at registration time so a
//! malformed template never enters the registry.

use crate::content::ResourceContents;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use td_types::{McpError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A parameterized resource advertised through `resources/templates/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceTemplate {
    /// Compile the template into a matcher. Fails on unbalanced or empty
    /// `{variable}` segments.
    pub fn compile(&self) -> Result<CompiledTemplate> {
        CompiledTemplate::parse(&self.uri_template)
    }
}

/// A URI template compiled to an anchored regex.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    template: String,
    pattern: Regex,
    variables: Vec<String>,
}

impl CompiledTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = template;

        loop {
            match rest.find('{') {
                None => {
                    if rest.contains('}') {
                        return Err(McpError::Protocol(format!(
                            "unbalanced '}}' in uri template: {template}"
                        )));
                    }
                    pattern.push_str(&regex::escape(rest));
                    break;
                }
                Some(open) => {
                    pattern.push_str(&regex::escape(&rest[..open]));
                    let after = &rest[open + 1..];
                    let close = after.find('}').ok_or_else(|| {
                        McpError::Protocol(format!("unbalanced '{{' in uri template: {template}"))
                    })?;
                    let name = &after[..close];
                    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        return Err(McpError::Protocol(format!(
                            "invalid variable name '{name}' in uri template: {template}"
                        )));
                    }
                    pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                    variables.push(name.to_string());
                    rest = &after[close + 1..];
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| McpError::Protocol(format!("uri template compile: {e}")))?;
        Ok(Self {
            template: template.to_string(),
            pattern: regex,
            variables,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Match a concrete URI against the template, extracting variable values.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let caps = self.pattern.captures(uri)?;
        let mut values = HashMap::with_capacity(self.variables.len());
        for name in &self.variables {
            values.insert(name.clone(), caps[name.as_str()].to_string());
        }
        Some(values)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResourcesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResourceTemplatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourceTemplatesResult {
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<ResourceTemplate>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeResult {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsubscribeResult {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdatedNotification {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceListChangedNotification {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}
