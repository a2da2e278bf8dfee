//! The unified streaming event set.

use crate::content::{GeneratedItem, MessageContent};
use crate::response::ModelResponse;
use serde::{Deserialize, Serialize};

/// One lifecycle event in a reconstructed response stream.
///
/// A well-formed stream is ordered `Create`, `ItemAdded`, `ContentAdded`,
/// zero or more `ContentDelta`, `ContentDone`, `ItemDone`, `Completed`, with
/// exactly one `Completed` and nothing after it. Wire form is
/// `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    /// A response has been opened; id and model may already be known.
    #[serde(rename = "response.create")]
    Create(ModelResponse),
    /// A new output item has started.
    #[serde(rename = "response.item.added")]
    ItemAdded(GeneratedItem),
    /// The first content block of the current item has started.
    #[serde(rename = "response.item.content.added")]
    ContentAdded(MessageContent),
    /// An incremental content fragment.
    #[serde(rename = "response.item.content.delta")]
    ContentDelta(MessageContent),
    /// The current content block is complete.
    #[serde(rename = "response.item.content.done")]
    ContentDone(MessageContent),
    /// The current output item is complete.
    #[serde(rename = "response.item.done")]
    ItemDone(GeneratedItem),
    /// The response is complete; always the final event.
    #[serde(rename = "response.completed")]
    Completed(ModelResponse),
}
