//! Content blocks: caller inputs and generated message items.
//!
//! Every shape here is tagged with a `type` discriminator on the wire, so
//! heterogeneous lists (conversation history, response items) decode without
//! extra framing.

use serde::{Deserialize, Serialize};

/// The author role attached to a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction.
    System,
    /// Model output.
    Assistant,
    /// An end-user turn.
    User,
    /// A developer-authored instruction.
    Developer,
}

/// Caller-supplied input content for a prompt turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Input {
    /// Plain text.
    #[serde(rename = "text")]
    Text(TextInput),
    /// A file attachment, inline or by provider-side id.
    #[serde(rename = "File")]
    File(FileInput),
}

impl Input {
    /// The author role of this input.
    pub fn role(&self) -> Role {
        match self {
            Self::Text(text) => text.role,
            Self::File(file) => file.role,
        }
    }

    /// Text input with the given role.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self::Text(TextInput {
            role,
            content: content.into(),
        })
    }

    /// User-authored text input.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// System-authored text input.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }
}

impl From<&str> for Input {
    fn from(content: &str) -> Self {
        Self::user(content)
    }
}

/// Text authored by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInput {
    /// Author role.
    pub role: Role,
    /// The text itself.
    pub content: String,
}

/// A file passed as input, either inline or referencing an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInput {
    /// Author role.
    pub role: Role,
    /// Provider-side file id, when previously uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Original filename hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// File data in the form the vendor expects (typically a data URL).
    pub content: String,
}

/// One content block inside a generated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageContent {
    /// Streamed or complete text.
    #[serde(rename = "response.message.text")]
    Text(TextContent),
    /// A refusal issued in place of the requested output.
    #[serde(rename = "response.message.text.refusal")]
    Refusal(RefusalContent),
}

/// Text content of a generated message.
///
/// During streaming, `delta` carries the fragment that produced an event and
/// `content` the cumulative text; a completed block has `content` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// Incremental fragment, present on streamed events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Cumulative text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Annotations attached to the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl TextContent {
    /// A completed text block with no delta.
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            delta: None,
            content: Some(content.into()),
            annotations: Vec::new(),
        }
    }

    /// A streamed fragment with no cumulative value.
    pub fn fragment(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            content: None,
            annotations: Vec::new(),
        }
    }
}

/// A refusal returned instead of the requested output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefusalContent {
    /// Refusal text from the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// An annotation attached to generated text (citations and similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Annotation {
    /// A text annotation.
    #[serde(rename = "response.message.text.annotation")]
    Text {
        /// Annotation identifier.
        id: String,
        /// Annotation payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

/// A message produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    /// Vendor-assigned item id.
    pub id: String,
    /// Ordinal position within the response, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Content blocks; absent while the item is still streaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<MessageContent>>,
}

impl MessageItem {
    /// Concatenated text across all text content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(|block| match block {
                MessageContent::Text(text) => text.content.as_deref(),
                MessageContent::Refusal(_) => None,
            })
            .collect()
    }
}

/// One generated output item within a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeneratedItem {
    /// A chat message.
    #[serde(rename = "response.message")]
    Message(MessageItem),
}

impl GeneratedItem {
    /// Concatenated text of the item's content blocks.
    pub fn text(&self) -> String {
        let Self::Message(message) = self;
        message.text()
    }
}
