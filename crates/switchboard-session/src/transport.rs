//! The network seam between provider adapters and the outside world.
//!
//! Adapters build a [`TransportRequest`] and hand it to a [`Transport`];
//! everything HTTP lives behind that trait so tests can substitute canned
//! responses without a server.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use switchboard_core::{Error, Result};

/// Raw response body bytes, delivered incrementally.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// One outbound provider call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Fully resolved endpoint URL.
    pub url: String,
    /// Bearer credential for the `Authorization` header.
    pub api_key: String,
    /// JSON request body.
    pub body: serde_json::Value,
}

/// The provider's reply, with the body still unread.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header value, when present.
    pub content_type: Option<String>,
    /// Body bytes.
    pub body: ByteStream,
}

impl TransportResponse {
    /// Drains the body into a string, replacing invalid UTF-8.
    pub async fn into_text(mut self) -> Result<String> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Performs a single request/response exchange.
///
/// Implementations must not retry; retry and fallback decisions belong to
/// the session loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response with an unread body.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// A transport with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// A transport reusing an existing client, for custom timeouts or
    /// proxies.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.api_key)
            .json(&request.body)
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(error) => Err(Error::Transport(error.to_string())),
            })
            .boxed();

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}
