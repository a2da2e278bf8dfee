//! The response envelope and generation metadata.

use crate::content::GeneratedItem;
use serde::{Deserialize, Serialize};

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<u64>,
    /// Tokens generated in the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    /// Total billed tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Why generation stopped before completing naturally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStop {
    /// Vendor finish code, e.g. `"length"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A failure reported inside an otherwise well-formed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationError {
    /// Vendor error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A complete response from one model call.
///
/// Streaming calls carry a partial response on the opening event and the
/// fully aggregated one on the final event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Vendor response id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Model that produced the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Generated output items in order.
    #[serde(default)]
    pub items: Vec<GeneratedItem>,
    /// Token accounting, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Early-stop reason, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<GenerationStop>,
    /// Generation failure reported by the vendor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
}

impl ModelResponse {
    /// Concatenated text of every generated message.
    pub fn text(&self) -> String {
        self.items.iter().map(GeneratedItem::text).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::{MessageContent, MessageItem, TextContent};

    #[test]
    fn optional_metadata_is_omitted() {
        let value = serde_json::to_value(ModelResponse::default()).unwrap();
        assert_eq!(value, serde_json::json!({"items": []}));
    }

    #[test]
    fn text_concatenates_items() {
        let response = ModelResponse {
            items: vec![
                GeneratedItem::Message(MessageItem {
                    id: "a".into(),
                    index: Some(0),
                    content: Some(vec![MessageContent::Text(TextContent::complete("Hel"))]),
                }),
                GeneratedItem::Message(MessageItem {
                    id: "b".into(),
                    index: Some(1),
                    content: Some(vec![MessageContent::Text(TextContent::complete("lo"))]),
                }),
            ],
            ..ModelResponse::default()
        };
        assert_eq!(response.text(), "Hello");
    }
}
