//! Provider adapters translating the unified prompt to vendor wire formats.
//!
//! Each adapter builds the vendor request body, sends it through the
//! [`Transport`] seam, and maps the reply back onto the unified response and
//! event types. Adapters never retry; failures surface as crate errors and
//! the session loop decides what happens next.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use switchboard_core::{
    Conversation, Error, ModelReference, ModelResponse, Prompt, ProviderConfig, ProviderKind,
    Result, StreamEvent,
};

use crate::transport::{ByteStream, Transport, TransportResponse};

pub mod compat;
pub mod openai;

pub use compat::OpenAiCompatibleAdapter;
pub use openai::OpenAiAdapter;

/// Reconstructed lifecycle events, delivered as they are pulled.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// One vendor protocol, spoken over an abstract transport.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Performs a buffered generation call.
    async fn generate(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        conversation: &Conversation,
    ) -> Result<ModelResponse>;

    /// Performs a streaming generation call.
    async fn stream(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        conversation: &Conversation,
    ) -> Result<EventStream>;
}

/// Resolves the adapter for a provider kind.
pub fn adapter_for(kind: ProviderKind) -> Result<&'static dyn ProviderAdapter> {
    static OPENAI: OpenAiAdapter = OpenAiAdapter;
    static COMPATIBLE: OpenAiCompatibleAdapter = OpenAiCompatibleAdapter;
    match kind {
        ProviderKind::OpenAi => Ok(&OPENAI),
        ProviderKind::OpenAiCompatible => Ok(&COMPATIBLE),
        ProviderKind::Gemini => Err(Error::UnsupportedProvider(kind)),
    }
}

/// Joins the provider base URL with an endpoint path, validating the result.
pub(crate) fn endpoint(config: &ProviderConfig, path: &str) -> Result<String> {
    let joined = format!("{}/{}", config.api_url.trim_end_matches('/'), path);
    reqwest::Url::parse(&joined)
        .map(String::from)
        .map_err(|_| Error::InvalidApiUrl(config.api_url.clone()))
}

/// Rejects non-200 replies, draining the body into the error.
pub(crate) async fn ensure_success(response: TransportResponse) -> Result<TransportResponse> {
    if response.status == 200 {
        return Ok(response);
    }
    let status = response.status;
    let body = response
        .into_text()
        .await
        .ok()
        .filter(|text| !text.is_empty());
    Err(Error::Http { status, body })
}

/// Rejects replies that are not server-sent events.
pub(crate) fn ensure_event_stream(response: TransportResponse) -> Result<TransportResponse> {
    let is_event_stream = response
        .content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("text/event-stream"));
    if is_event_stream {
        Ok(response)
    } else {
        Err(Error::UnsupportedContentType)
    }
}

/// Incremental server-sent-events parser yielding `data:` payloads.
///
/// Comment lines, field lines other than `data:`, and blank separators are
/// skipped. The `[DONE]` sentinel and body exhaustion both end the sequence;
/// an incomplete trailing line is discarded with the connection.
pub(crate) struct SseLines {
    body: ByteStream,
    buffer: Vec<u8>,
    done: bool,
}

impl SseLines {
    pub(crate) fn new(body: ByteStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            done: false,
        }
    }

    pub(crate) async fn next_data(&mut self) -> Option<Result<String>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=position).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\r', '\n']);
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim_start();
                if data == "[DONE]" {
                    self.done = true;
                    return None;
                }
                if data.is_empty() {
                    continue;
                }
                return Some(Ok(data.to_owned()));
            }
            match self.body.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn config(api_url: &str) -> ProviderConfig {
        ProviderConfig::new(ProviderKind::OpenAiCompatible, "local", "sk-test", api_url)
    }

    fn lines_of(chunks: Vec<&str>) -> SseLines {
        let chunks: Vec<Result<Vec<u8>>> = chunks
            .into_iter()
            .map(|chunk| Ok(chunk.as_bytes().to_vec()))
            .collect();
        SseLines::new(stream::iter(chunks).boxed())
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let url = endpoint(&config("http://localhost:1234/v1"), "chat/completions").unwrap();
        assert_eq!(url, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let url = endpoint(&config("http://localhost:1234/v1/"), "responses").unwrap();
        assert_eq!(url, "http://localhost:1234/v1/responses");
    }

    #[test]
    fn endpoint_rejects_invalid_base() {
        let result = endpoint(&config("not a url"), "chat/completions");
        assert!(matches!(result, Err(Error::InvalidApiUrl(url)) if url == "not a url"));
    }

    #[tokio::test]
    async fn sse_payloads_survive_chunk_boundaries() {
        let mut lines = lines_of(vec![
            ": keep-alive\n",
            "data: {\"a\"",
            ":1}\n\ndata:",
            " {\"b\":2}\n\n",
            "data: [DONE]\n\n",
        ]);
        assert_eq!(lines.next_data().await.unwrap().unwrap(), "{\"a\":1}");
        assert_eq!(lines.next_data().await.unwrap().unwrap(), "{\"b\":2}");
        assert!(lines.next_data().await.is_none());
        assert!(lines.next_data().await.is_none());
    }

    #[tokio::test]
    async fn sse_exhaustion_without_done_ends_the_sequence() {
        let mut lines = lines_of(vec!["data: {\"a\":1}\n", "data: {\"partial\""]);
        assert_eq!(lines.next_data().await.unwrap().unwrap(), "{\"a\":1}");
        assert!(lines.next_data().await.is_none());
    }

    #[tokio::test]
    async fn sse_body_errors_are_forwarded_once() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"a\":1}\n".to_vec()),
            Err(Error::Transport("reset".into())),
        ];
        let mut lines = SseLines::new(stream::iter(chunks).boxed());
        assert_eq!(lines.next_data().await.unwrap().unwrap(), "{\"a\":1}");
        assert!(matches!(lines.next_data().await, Some(Err(_))));
        assert!(lines.next_data().await.is_none());
    }
}
