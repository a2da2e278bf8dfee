//! Append-only conversation history.

use crate::content::{GeneratedItem, Input};
use serde::{Deserialize, Serialize};

/// One entry in a conversation: caller input or model output.
///
/// Encoded without extra framing; the payload's `type` tag disambiguates on
/// decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationItem {
    /// Caller-supplied input.
    Input(Input),
    /// Model-generated output.
    Generated(GeneratedItem),
}

/// Ordered turn history carried across calls.
///
/// The session appends to this after each successful turn; entries are never
/// reordered or pruned here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-side conversation id, when resuming stored state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// History entries, oldest first.
    #[serde(default)]
    pub items: Vec<ConversationItem>,
}

impl Conversation {
    /// An empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation resuming the given server-side id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            items: Vec::new(),
        }
    }

    /// Appends one turn: the inputs sent, then the items generated.
    pub fn append_turn(&mut self, inputs: &[Input], items: &[GeneratedItem]) {
        self.items
            .extend(inputs.iter().cloned().map(ConversationItem::Input));
        self.items
            .extend(items.iter().cloned().map(ConversationItem::Generated));
    }

    /// Number of history entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there is no history.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
