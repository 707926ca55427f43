//! Polymorphic message content
//!
//! Tool results, prompt messages and sampling messages all carry a union
//! content type discriminated by `type`. Decoding resolves the discriminator
//! first and fails with "unknown content type" for anything outside the
//! known set, instead of duck-typing on field shapes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Message sender role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content union: text, image, audio or an embedded resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        /// base64-encoded image bytes
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        /// base64-encoded audio bytes
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| serde::de::Error::custom("content missing 'type' discriminator"))?;

        // Candidates are resolved in a fixed order: text, image, audio,
        // embedded resource.
        match kind {
            "text" => {
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| serde::de::Error::custom("text content missing 'text'"))?;
                Ok(Content::Text {
                    text: text.to_string(),
                })
            }
            "image" | "audio" => {
                let data = value
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| serde::de::Error::custom("binary content missing 'data'"))?
                    .to_string();
                let mime_type = value
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .ok_or_else(|| serde::de::Error::custom("binary content missing 'mimeType'"))?
                    .to_string();
                if kind == "image" {
                    Ok(Content::Image { data, mime_type })
                } else {
                    Ok(Content::Audio { data, mime_type })
                }
            }
            "resource" => {
                let resource = value
                    .get("resource")
                    .cloned()
                    .ok_or_else(|| serde::de::Error::custom("embedded content missing 'resource'"))?;
                Ok(Content::Resource {
                    resource: serde_json::from_value(resource).map_err(serde::de::Error::custom)?,
                })
            }
            other => Err(serde::de::Error::custom(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

/// Contents of a read resource: textual or binary.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContents {
    Text {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        text: String,
    },
    Blob {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// base64-encoded bytes
        blob: String,
    },
}

impl<'de> Deserialize<'de> for ResourceContents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let uri = value
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| serde::de::Error::custom("resource contents missing 'uri'"))?
            .to_string();
        let mime_type = value
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(text) = value.get("text").and_then(Value::as_str) {
            return Ok(ResourceContents::Text {
                uri,
                mime_type,
                text: text.to_string(),
            });
        }
        if let Some(blob) = value.get("blob").and_then(Value::as_str) {
            return Ok(ResourceContents::Blob {
                uri,
                mime_type,
                blob: blob.to_string(),
            });
        }
        Err(serde::de::Error::custom(
            "resource contents carries neither 'text' nor 'blob'",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_content_roundtrip() {
        let content = Content::text("hello");
        let encoded = serde_json::to_value(&content).unwrap();
        assert_eq!(encoded, json!({"type": "text", "text": "hello"}));

        let decoded: Content = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_image_content_decodes() {
        let decoded: Content =
            serde_json::from_value(json!({"type": "image", "data": "aGk=", "mimeType": "image/png"}))
                .unwrap();
        assert!(matches!(decoded, Content::Image { ref mime_type, .. } if mime_type == "image/png"));
    }

    #[test]
    fn test_unknown_content_type_rejected() {
        let err = serde_json::from_value::<Content>(json!({"type": "video", "data": "x"}))
            .unwrap_err()
            .to_string();
        assert!(err.contains("unknown content type"));
    }

    #[test]
    fn test_missing_discriminator_rejected() {
        assert!(serde_json::from_value::<Content>(json!({"text": "hi"})).is_err());
    }

    #[test]
    fn test_embedded_resource_content() {
        let decoded: Content = serde_json::from_value(json!({
            "type": "resource",
            "resource": {"uri": "file:///a.txt", "mimeType": "text/plain", "text": "body"}
        }))
        .unwrap();
        match decoded {
            Content::Resource {
                resource: ResourceContents::Text { uri, text, .. },
            } => {
                assert_eq!(uri, "file:///a.txt");
                assert_eq!(text, "body");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_resource_contents_text_before_blob() {
        let decoded: ResourceContents =
            serde_json::from_value(json!({"uri": "u", "text": "t"})).unwrap();
        assert!(matches!(decoded, ResourceContents::Text { .. }));

        let decoded: ResourceContents =
            serde_json::from_value(json!({"uri": "u", "blob": "AA=="})).unwrap();
        assert!(matches!(decoded, ResourceContents::Blob { .. }));

        assert!(serde_json::from_value::<ResourceContents>(json!({"uri": "u"})).is_err());
    }
}
