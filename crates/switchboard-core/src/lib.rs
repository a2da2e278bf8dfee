//! Shared data model for provider-agnostic language-model calls.
//!
//! This crate holds the types exchanged between callers, the session layer,
//! and provider adapters: prompts and their content blocks, responses and
//! streaming events, conversation history, provider addressing, and the
//! unified error taxonomy. It performs no I/O.
//!
//! # Main types
//!
//! - [`Error`] — Unified error enum for every call outcome.
//! - [`Result`] — Convenience alias for `Result<T, Error>`.
//! - [`ProviderConfig`] / [`ModelReference`] / [`QualifiedModel`] — Which
//!   backend(s) to call, in fallback order.
//! - [`Prompt`] / [`Instructions`] / [`Input`] — What to send.
//! - [`ModelResponse`] / [`GeneratedItem`] — What comes back.
//! - [`StreamEvent`] — Incremental lifecycle events for streamed responses.
//! - [`Conversation`] — Append-only turn history carried across calls.

pub mod content;
pub mod conversation;
pub mod prompt;
pub mod provider;
pub mod response;
pub mod stream;

use indexmap::IndexMap;

// --- Error types ---

/// Top-level error type for all call outcomes.
///
/// [`Error::InvalidApiUrl`] and [`Error::UnsupportedProvider`] are permanent
/// for a given model reference; everything else is treated as transient by
/// the retry layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A qualified model carried no candidates.
    #[error("model list is empty")]
    EmptyModelList,

    /// The provider base URL could not be parsed.
    #[error("invalid API URL: {0}")]
    InvalidApiUrl(String),

    /// A streaming response arrived with a non-SSE content type.
    #[error("unsupported content type")]
    UnsupportedContentType,

    /// The provider answered with a non-success HTTP status.
    #[error("HTTP status {status}")]
    Http {
        /// Response status code.
        status: u16,
        /// Collected error body, when one was readable.
        body: Option<String>,
    },

    /// A success status arrived without a body.
    #[error("empty response body")]
    EmptyResponseBody,

    /// No adapter exists for the provider kind.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(ProviderKind),

    /// The candidate was ruled out by retry advice before any request.
    #[error("skipped by retry advice")]
    SkippedByAdvice,

    /// Every candidate failed; one entry per attempted model, in order.
    #[error("all {} model candidates failed", .0.len())]
    RetryFailed(IndexMap<String, Error>),

    /// A connection or read failure below the HTTP layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed JSON from the provider.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A convenience `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// --- Re-exports ---

pub use content::{
    Annotation, FileInput, GeneratedItem, Input, MessageContent, MessageItem, RefusalContent,
    Role, TextContent, TextInput,
};
pub use conversation::{Conversation, ConversationItem};
pub use prompt::{Instructions, Prompt};
pub use provider::{Model, ModelReference, ProviderConfig, ProviderKind, QualifiedModel};
pub use response::{GenerationError, GenerationStop, ModelResponse, TokenUsage};
pub use stream::StreamEvent;
