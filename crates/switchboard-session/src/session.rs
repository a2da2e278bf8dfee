//! The session: conversation state plus the retry/fallback loop.
//!
//! A [`Session`] snapshots its conversation when a call starts and replaces
//! it wholesale when the call succeeds, so concurrent calls never observe a
//! half-updated history; the last writer wins. For streamed calls the
//! replacement happens lazily, when the `Completed` event passes through to
//! the consumer, not when the stream is handed over.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(test)]
use std::future::Future;
#[cfg(test)]
use std::pin::Pin;

use futures_util::StreamExt;
use switchboard_core::{
    Conversation, Error, Input, ModelReference, ModelResponse, Prompt, QualifiedModel, Result,
    StreamEvent,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::providers::{adapter_for, EventStream};
use crate::retry::{RetryAdviser, RetryContext};
use crate::transport::Transport;

#[cfg(test)]
type SleepFn = Box<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A stateful generation session over one or more provider backends.
///
/// Cheap to construct; the expensive part is the [`Transport`], which is
/// shared. New sessions use the process-wide retry adviser so models that
/// just failed elsewhere are skipped here too; [`Session::with_adviser`]
/// isolates that state.
pub struct Session {
    transport: Arc<dyn Transport>,
    adviser: Arc<RetryAdviser>,
    conversation: Arc<Mutex<Conversation>>,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl Session {
    /// A session with an empty conversation and the shared retry adviser.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            adviser: RetryAdviser::shared(),
            conversation: Arc::new(Mutex::new(Conversation::new())),
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// Replaces the retry adviser with a private one.
    pub fn with_adviser(mut self, adviser: Arc<RetryAdviser>) -> Self {
        self.adviser = adviser;
        self
    }

    /// Starts from an existing conversation instead of an empty one.
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = Arc::new(Mutex::new(conversation));
        self
    }

    /// A snapshot of the current conversation.
    pub fn conversation(&self) -> Conversation {
        lock(&self.conversation).clone()
    }

    /// Performs one buffered generation call against a single model.
    ///
    /// On success the conversation gains this turn's inputs followed by the
    /// generated items.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        model: &ModelReference,
    ) -> Result<ModelResponse> {
        debug_assert!(!prompt.stream, "buffered call with a streaming prompt");
        let history = self.conversation();
        let adapter = adapter_for(model.provider.kind)?;
        let response = adapter
            .generate(self.transport.as_ref(), model, prompt, &history)
            .await?;
        let mut updated = history;
        updated.append_turn(&prompt.inputs, &response.items);
        *lock(&self.conversation) = updated;
        Ok(response)
    }

    /// Opens a streaming generation call against a single model.
    ///
    /// The conversation is updated when the `Completed` event is pulled
    /// through the returned stream; an abandoned stream leaves it untouched.
    pub async fn stream(&self, prompt: &Prompt, model: &ModelReference) -> Result<EventStream> {
        debug_assert!(prompt.stream, "streaming call with a buffered prompt");
        let history = self.conversation();
        let adapter = adapter_for(model.provider.kind)?;
        let events = adapter
            .stream(self.transport.as_ref(), model, prompt, &history)
            .await?;
        Ok(self.track_completion(events, history, prompt.inputs.clone()))
    }

    /// Performs a buffered call with fallback across a candidate chain.
    ///
    /// Candidates are tried in order. A cached skip verdict rules one out
    /// without a request; a failure either cools down and retries the same
    /// candidate or advances, per the adviser. The first success wins and
    /// clears the winner's cache entry. When every candidate has failed the
    /// per-candidate errors come back as [`Error::RetryFailed`].
    pub async fn generate_qualified(
        &self,
        prompt: &Prompt,
        qualified: &QualifiedModel,
    ) -> Result<ModelResponse> {
        debug_assert!(!prompt.stream, "buffered call with a streaming prompt");
        if qualified.models.is_empty() {
            return Err(Error::EmptyModelList);
        }
        let operation = Uuid::new_v4();
        let mut context = RetryContext::new();
        for current in &qualified.models {
            context.set_current(current.clone());
            if self.adviser.skip(&context) {
                info!(%operation, qualified = %qualified.name, model = %current.name(), "candidate skipped on cached advice");
                context.record(current, Error::SkippedByAdvice);
                continue;
            }
            loop {
                match self.generate(prompt, current).await {
                    Ok(response) => {
                        debug!(%operation, qualified = %qualified.name, model = %current.name(), "candidate succeeded");
                        self.adviser.clean_cache(current);
                        return Ok(response);
                    }
                    Err(error) => {
                        warn!(%operation, qualified = %qualified.name, model = %current.name(), %error, "candidate failed");
                        let delay = self.adviser.retry(&context, &error);
                        context.record(current, error);
                        let Some(delay) = delay else { break };
                        debug!(%operation, model = %current.name(), delay_ms = delay.as_millis() as u64, "cooling down before retry");
                        self.pause(delay).await;
                    }
                }
            }
        }
        Err(Error::RetryFailed(context.into_errors()))
    }

    /// Opens a streaming call with fallback across a candidate chain.
    ///
    /// Fallback covers call setup only; once a stream is handed over, later
    /// failures on it belong to the consumer.
    pub async fn stream_qualified(
        &self,
        prompt: &Prompt,
        qualified: &QualifiedModel,
    ) -> Result<EventStream> {
        debug_assert!(prompt.stream, "streaming call with a buffered prompt");
        if qualified.models.is_empty() {
            return Err(Error::EmptyModelList);
        }
        let operation = Uuid::new_v4();
        let mut context = RetryContext::new();
        for current in &qualified.models {
            context.set_current(current.clone());
            if self.adviser.skip(&context) {
                info!(%operation, qualified = %qualified.name, model = %current.name(), "candidate skipped on cached advice");
                context.record(current, Error::SkippedByAdvice);
                continue;
            }
            loop {
                match self.stream(prompt, current).await {
                    Ok(events) => {
                        debug!(%operation, qualified = %qualified.name, model = %current.name(), "stream opened");
                        self.adviser.clean_cache(current);
                        return Ok(events);
                    }
                    Err(error) => {
                        warn!(%operation, qualified = %qualified.name, model = %current.name(), %error, "candidate failed");
                        let delay = self.adviser.retry(&context, &error);
                        context.record(current, error);
                        let Some(delay) = delay else { break };
                        debug!(%operation, model = %current.name(), delay_ms = delay.as_millis() as u64, "cooling down before retry");
                        self.pause(delay).await;
                    }
                }
            }
        }
        Err(Error::RetryFailed(context.into_errors()))
    }

    /// Applies the conversation update when `Completed` flows through.
    fn track_completion(
        &self,
        events: EventStream,
        history: Conversation,
        inputs: Vec<Input>,
    ) -> EventStream {
        let cell = Arc::clone(&self.conversation);
        events
            .map(move |event| {
                if let Ok(StreamEvent::Completed(response)) = &event {
                    let mut updated = history.clone();
                    updated.append_turn(&inputs, &response.items);
                    *lock(&cell) = updated;
                }
                event
            })
            .boxed()
    }

    /// Sleeps between attempts on the same candidate.
    ///
    /// The timer runs as its own task so a cancelled timer cannot abort the
    /// fallback pass; the interruption is logged and the next attempt starts
    /// immediately.
    async fn pause(&self, delay: Duration) {
        #[cfg(test)]
        if let Some(sleep) = &self.sleep_fn {
            sleep(delay).await;
            return;
        }
        if delay.is_zero() {
            return;
        }
        if let Err(error) = tokio::spawn(tokio::time::sleep(delay)).await {
            warn!(%error, "retry cool-down interrupted, continuing without delay");
        }
    }
}

fn lock(cell: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::retry::RetryStrategy;
    use crate::transport::{ByteStream, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use switchboard_core::{Model, ProviderConfig, ProviderKind};

    enum Reply {
        Json(Value),
        Sse(&'static str),
        Status(u16, &'static str),
        Down,
    }

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn body_of(text: String) -> ByteStream {
        futures_util::stream::iter(vec![Ok(text.into_bytes())]).boxed()
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted request");
            match reply {
                Reply::Json(value) => Ok(TransportResponse {
                    status: 200,
                    content_type: Some("application/json".into()),
                    body: body_of(value.to_string()),
                }),
                Reply::Sse(text) => Ok(TransportResponse {
                    status: 200,
                    content_type: Some("text/event-stream".into()),
                    body: body_of(text.to_owned()),
                }),
                Reply::Status(status, text) => Ok(TransportResponse {
                    status,
                    content_type: None,
                    body: body_of(text.to_owned()),
                }),
                Reply::Down => Err(Error::Transport("connection refused".into())),
            }
        }
    }

    fn reference(provider: &str, model: &str) -> ModelReference {
        ModelReference::new(
            Model::new(model),
            ProviderConfig::new(
                ProviderKind::OpenAiCompatible,
                provider,
                "sk-test",
                "http://localhost:9999/v1",
            ),
        )
    }

    fn qualified(models: Vec<ModelReference>) -> QualifiedModel {
        QualifiedModel {
            name: "default".into(),
            models,
        }
    }

    fn private_adviser(strategy: RetryStrategy) -> Arc<RetryAdviser> {
        Arc::new(RetryAdviser::new(strategy))
    }

    fn completion(text: &str) -> Value {
        json!({
            "id": "chatcmpl-9",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        })
    }

    const STREAM_BODY: &str = concat!(
        "data: {\"id\":\"c-9\",\"model\":\"m\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"index\":0}]}\n\n",
        "data: {\"id\":\"c-9\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\",\"index\":0}]}\n\n",
        "data: {\"id\":\"c-9\",\"choices\":[],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1,\"total_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );

    #[tokio::test]
    async fn generate_appends_the_turn_to_the_conversation() {
        let transport = ScriptedTransport::new(vec![Reply::Json(completion("Hello there."))]);
        let session = Session::new(transport.clone())
            .with_adviser(private_adviser(RetryStrategy::default()));
        let prompt = Prompt::text("Hi").with_stream(false);

        let response = session.generate(&prompt, &reference("local", "m")).await.unwrap();

        assert_eq!(response.text(), "Hello there.");
        let conversation = session.conversation();
        assert_eq!(conversation.len(), 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn qualified_generate_falls_back_to_the_next_candidate() {
        let transport = ScriptedTransport::new(vec![
            Reply::Status(500, "overloaded"),
            Reply::Json(completion("From B.")),
        ]);
        let adviser = private_adviser(RetryStrategy::default());
        let session = Session::new(transport.clone()).with_adviser(Arc::clone(&adviser));
        let first = reference("a", "m1");
        let second = reference("b", "m2");
        let chain = qualified(vec![first.clone(), second.clone()]);
        let prompt = Prompt::text("Hi").with_stream(false);

        let response = session.generate_qualified(&prompt, &chain).await.unwrap();

        assert_eq!(response.text(), "From B.");
        assert_eq!(transport.request_count(), 2);
        assert_eq!(session.conversation().len(), 2);

        // The loser cools down; the winner carries no verdict.
        let mut context = RetryContext::new();
        context.set_current(first);
        assert!(adviser.skip(&context));
        context.set_current(second);
        assert!(!adviser.skip(&context));
    }

    #[tokio::test]
    async fn qualified_generate_skips_candidates_on_cached_advice() {
        let transport = ScriptedTransport::new(vec![Reply::Json(completion("From B."))]);
        let adviser = private_adviser(RetryStrategy::default());
        let first = reference("a", "m1");
        let second = reference("b", "m2");

        // Seed a permanent verdict for the first candidate.
        let mut seed = RetryContext::new();
        seed.set_current(first.clone());
        assert!(adviser
            .retry(&seed, &Error::InvalidApiUrl("nope".into()))
            .is_none());

        let session = Session::new(transport.clone()).with_adviser(adviser);
        let chain = qualified(vec![first, second]);
        let prompt = Prompt::text("Hi").with_stream(false);

        let response = session.generate_qualified(&prompt, &chain).await.unwrap();
        assert_eq!(response.text(), "From B."); // no request went to the first
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn qualified_generate_retries_in_place_when_configured() {
        let transport = ScriptedTransport::new(vec![
            Reply::Status(500, "a"),
            Reply::Down,
            Reply::Status(503, "c"),
        ]);
        let strategy = RetryStrategy {
            max_attempts_per_provider: 2,
            prefer_next_provider: false,
            backoff: BackoffPolicy::simple(Duration::from_millis(5)),
        };
        let slept: Arc<Mutex<Vec<Duration>>> = Arc::default();
        let recorder = Arc::clone(&slept);
        let mut session =
            Session::new(transport.clone()).with_adviser(private_adviser(strategy));
        session.sleep_fn = Some(Box::new(move |delay| {
            recorder.lock().unwrap().push(delay);
            Box::pin(async {})
        }));
        let only = reference("a", "m1");
        let chain = qualified(vec![only.clone()]);
        let prompt = Prompt::text("Hi").with_stream(false);

        let error = session.generate_qualified(&prompt, &chain).await.unwrap_err();

        // Two cool-down retries, then the third failure exhausts the budget.
        assert_eq!(transport.request_count(), 3);
        assert_eq!(
            slept.lock().unwrap().as_slice(),
            [Duration::from_millis(5), Duration::from_millis(5)]
        );
        let Error::RetryFailed(errors) = error else {
            panic!("expected RetryFailed, got {error:?}");
        };
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors.get(&only.name()), Some(Error::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn empty_candidate_chain_fails_without_a_request() {
        let transport = ScriptedTransport::new(vec![]);
        let session = Session::new(transport.clone())
            .with_adviser(private_adviser(RetryStrategy::default()));
        let prompt = Prompt::text("Hi").with_stream(false);

        let error = session
            .generate_qualified(&prompt, &qualified(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(error, Error::EmptyModelList));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn all_skipped_candidates_surface_as_retry_failed() {
        let transport = ScriptedTransport::new(vec![]);
        let adviser = private_adviser(RetryStrategy::default());
        let only = reference("a", "m1");
        let mut seed = RetryContext::new();
        seed.set_current(only.clone());
        adviser.retry(&seed, &Error::InvalidApiUrl("nope".into()));

        let session = Session::new(transport.clone()).with_adviser(adviser);
        let prompt = Prompt::text("Hi").with_stream(false);
        let error = session
            .generate_qualified(&prompt, &qualified(vec![only.clone()]))
            .await
            .unwrap_err();

        let Error::RetryFailed(errors) = error else {
            panic!("expected RetryFailed, got {error:?}");
        };
        assert!(matches!(errors.get(&only.name()), Some(Error::SkippedByAdvice)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn stream_defers_the_conversation_update_until_completed() {
        let transport = ScriptedTransport::new(vec![Reply::Sse(STREAM_BODY)]);
        let session = Session::new(transport)
            .with_adviser(private_adviser(RetryStrategy::default()))
            .with_conversation(Conversation::with_id("conv-1"));
        let prompt = Prompt::text("Hi");

        let mut events = session.stream(&prompt, &reference("local", "m")).await.unwrap();

        // Create, ItemAdded, ContentAdded, ContentDone, ItemDone.
        for _ in 0..5 {
            events.next().await.unwrap().unwrap();
            assert!(session.conversation().is_empty());
        }
        let completed = events.next().await.unwrap().unwrap();
        assert!(matches!(completed, StreamEvent::Completed(_)));
        let conversation = session.conversation();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.id.as_deref(), Some("conv-1"));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_stream_leaves_the_conversation_untouched() {
        let transport = ScriptedTransport::new(vec![Reply::Sse(STREAM_BODY)]);
        let session = Session::new(transport)
            .with_adviser(private_adviser(RetryStrategy::default()));
        let prompt = Prompt::text("Hi");

        let mut events = session.stream(&prompt, &reference("local", "m")).await.unwrap();
        events.next().await.unwrap().unwrap();
        drop(events);

        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn qualified_stream_falls_back_on_setup_failure() {
        let transport = ScriptedTransport::new(vec![
            Reply::Status(502, "bad gateway"),
            Reply::Sse(STREAM_BODY),
        ]);
        let session = Session::new(transport.clone())
            .with_adviser(private_adviser(RetryStrategy::default()));
        let chain = qualified(vec![reference("a", "m1"), reference("b", "m2")]);
        let prompt = Prompt::text("Hi");

        let events = session.stream_qualified(&prompt, &chain).await.unwrap();
        let events: Vec<StreamEvent> = events.map(|event| event.unwrap()).collect().await;

        assert_eq!(transport.request_count(), 2);
        let StreamEvent::Completed(response) = events.last().unwrap() else {
            panic!("expected a completed event");
        };
        assert_eq!(response.text(), "Hi");
        assert_eq!(session.conversation().len(), 2);
    }

    #[tokio::test]
    async fn non_sse_reply_fails_the_streaming_call() {
        let transport = ScriptedTransport::new(vec![Reply::Json(completion("nope"))]);
        let session = Session::new(transport)
            .with_adviser(private_adviser(RetryStrategy::default()));
        let prompt = Prompt::text("Hi");

        let error = session
            .stream(&prompt, &reference("local", "m"))
            .await
            .err()
            .unwrap();
        assert!(matches!(error, Error::UnsupportedContentType));
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn unsupported_provider_is_rejected_before_any_request() {
        let transport = ScriptedTransport::new(vec![]);
        let session = Session::new(transport.clone())
            .with_adviser(private_adviser(RetryStrategy::default()));
        let gemini = ModelReference::new(
            Model::new("g"),
            ProviderConfig::new(ProviderKind::Gemini, "gem", "sk", "http://localhost/v1"),
        );
        let prompt = Prompt::text("Hi").with_stream(false);

        let error = session.generate(&prompt, &gemini).await.unwrap_err();
        assert!(matches!(error, Error::UnsupportedProvider(ProviderKind::Gemini)));
        assert_eq!(transport.request_count(), 0);
    }
}
