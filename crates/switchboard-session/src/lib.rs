//! Session orchestration over language-model providers.
//!
//! This crate drives the calls that `switchboard-core` only describes: a
//! [`Session`] holds conversation state, dispatches prompts to provider
//! adapters over an abstract [`Transport`], reconstructs streamed replies
//! into lifecycle events, and walks fallback chains under the guidance of a
//! process-wide [`RetryAdviser`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard_core::{Model, ModelReference, Prompt, ProviderConfig, ProviderKind};
//! use switchboard_session::{HttpTransport, Session};
//!
//! # async fn run() -> switchboard_core::Result<()> {
//! let provider = ProviderConfig::new(
//!     ProviderKind::OpenAiCompatible,
//!     "local",
//!     "sk-local",
//!     "http://localhost:1234/v1",
//! );
//! let model = ModelReference::new(Model::new("qwen2.5-7b"), provider);
//! let session = Session::new(Arc::new(HttpTransport::new()));
//! let response = session
//!     .generate(&Prompt::text("Hello!").with_stream(false), &model)
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod providers;
pub mod reconstruct;
pub mod retry;
pub mod session;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use providers::{
    adapter_for, EventStream, OpenAiAdapter, OpenAiCompatibleAdapter, ProviderAdapter,
};
pub use reconstruct::{RawChunk, Reconstructor};
pub use retry::{RetryAdvice, RetryAdviser, RetryContext, RetryStrategy};
pub use session::Session;
pub use transport::{ByteStream, HttpTransport, Transport, TransportRequest, TransportResponse};
