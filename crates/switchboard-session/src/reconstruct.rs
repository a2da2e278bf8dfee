//! Reconstruction of unified stream events from raw provider chunks.
//!
//! Chat-completion style streams deliver many small deltas with no lifecycle
//! framing. [`Reconstructor`] turns that chunk sequence into the ordered
//! event set: `Create`, `ItemAdded`, `ContentAdded`, `ContentDelta`
//! repeated, `ContentDone`, `ItemDone`, `Completed`. Consumption is pull
//! based; the machine only advances when the consumer asks for the next
//! event, and buffers nothing beyond the accumulated text of the single
//! in-flight item.

use futures_util::{Stream, StreamExt};
use switchboard_core::{
    GeneratedItem, GenerationStop, MessageContent, MessageItem, ModelResponse, RefusalContent,
    Result, Role, StreamEvent, TextContent, TokenUsage,
};

/// One decoded chunk of a raw provider stream, already stripped of vendor
/// framing. Every field is optional; a chunk may carry content, bookkeeping,
/// or nothing of interest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawChunk {
    /// Vendor response id.
    pub id: Option<String>,
    /// Model that produced the chunk.
    pub model: Option<String>,
    /// Role marker, usually only on the first chunk.
    pub role: Option<Role>,
    /// Incremental text fragment.
    pub delta: Option<String>,
    /// Refusal text, delivered whole.
    pub refusal: Option<String>,
    /// Finish marker, when the vendor reports one.
    pub stop: Option<GenerationStop>,
    /// Token accounting, usually on a trailing bookkeeping chunk.
    pub usage: Option<TokenUsage>,
}

/// Which event the next pull produces. Phases carry no payload so an
/// in-progress pull that gets dropped leaves the machine intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Create,
    ItemAdded,
    ContentAdded,
    ContentDelta,
    ContentDone,
    ItemDone,
    Completed,
    Finished,
}

/// Pull-based state machine rebuilding the event lifecycle from raw chunks.
///
/// Exactly one message item is tracked per stream; current providers never
/// interleave items. After the `Completed` event the machine is finished and
/// every further pull returns `None`. A chunk error is forwarded once and
/// also finishes the machine.
#[derive(Debug)]
pub struct Reconstructor<S> {
    source: S,
    phase: Phase,
    pending: Option<RawChunk>,
    id: Option<String>,
    model: Option<String>,
    usage: Option<TokenUsage>,
    stop: Option<GenerationStop>,
    text: String,
    content: Option<MessageContent>,
    item: Option<GeneratedItem>,
}

impl<S> Reconstructor<S>
where
    S: Stream<Item = Result<RawChunk>> + Unpin + Send,
{
    /// Wraps a raw chunk stream.
    pub fn new(source: S) -> Self {
        Self {
            source,
            phase: Phase::Create,
            pending: None,
            id: None,
            model: None,
            usage: None,
            stop: None,
            text: String::new(),
            content: None,
            item: None,
        }
    }

    /// Produces the next lifecycle event, or `None` once the stream is over.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            match self.phase {
                Phase::Create => match self.source.next().await {
                    Some(Ok(chunk)) => {
                        self.absorb(&chunk);
                        self.pending = Some(chunk);
                        self.phase = Phase::ItemAdded;
                        return Some(Ok(StreamEvent::Create(self.partial_response())));
                    }
                    Some(Err(error)) => {
                        self.phase = Phase::Finished;
                        return Some(Err(error));
                    }
                    None => {
                        self.phase = Phase::Completed;
                        return Some(Ok(StreamEvent::Create(self.partial_response())));
                    }
                },

                Phase::ItemAdded => {
                    self.phase = Phase::ContentAdded;
                    let item = MessageItem {
                        id: self.item_id(),
                        index: Some(0),
                        content: None,
                    };
                    return Some(Ok(StreamEvent::ItemAdded(GeneratedItem::Message(item))));
                }

                Phase::ContentAdded => {
                    let first = self.pending.take().unwrap_or_default();
                    if let Some(refusal) = first.refusal {
                        self.close_content(MessageContent::Refusal(RefusalContent {
                            content: Some(refusal),
                        }));
                        continue;
                    }
                    if let Some(fragment) = &first.delta {
                        self.text.push_str(fragment);
                    }
                    self.phase = Phase::ContentDelta;
                    return Some(Ok(StreamEvent::ContentAdded(MessageContent::Text(
                        TextContent {
                            delta: first.delta.clone(),
                            content: first.delta,
                            annotations: Vec::new(),
                        },
                    ))));
                }

                Phase::ContentDelta => match self.source.next().await {
                    Some(Ok(chunk)) => {
                        self.absorb(&chunk);
                        if let Some(refusal) = chunk.refusal {
                            self.close_content(MessageContent::Refusal(RefusalContent {
                                content: Some(refusal),
                            }));
                            continue;
                        }
                        if let Some(fragment) = chunk.delta {
                            self.text.push_str(&fragment);
                            return Some(Ok(StreamEvent::ContentDelta(MessageContent::Text(
                                TextContent::fragment(fragment),
                            ))));
                        }
                        if chunk.usage.is_some() {
                            // Terminal bookkeeping chunk, flush the item.
                            let text = self.text.clone();
                            self.close_content(MessageContent::Text(TextContent::complete(text)));
                        }
                        // Finish markers without payload stay silent.
                        continue;
                    }
                    Some(Err(error)) => {
                        self.phase = Phase::Finished;
                        return Some(Err(error));
                    }
                    None => {
                        let text = self.text.clone();
                        self.close_content(MessageContent::Text(TextContent::complete(text)));
                        continue;
                    }
                },

                Phase::ContentDone => {
                    self.phase = Phase::ItemDone;
                    let content = self
                        .content
                        .clone()
                        .unwrap_or_else(|| MessageContent::Text(TextContent::default()));
                    return Some(Ok(StreamEvent::ContentDone(content)));
                }

                Phase::ItemDone => {
                    self.phase = Phase::Completed;
                    let item = GeneratedItem::Message(MessageItem {
                        id: self.item_id(),
                        index: Some(0),
                        content: self.content.take().map(|content| vec![content]),
                    });
                    self.item = Some(item.clone());
                    return Some(Ok(StreamEvent::ItemDone(item)));
                }

                Phase::Completed => {
                    self.phase = Phase::Finished;
                    return Some(Ok(StreamEvent::Completed(self.final_response())));
                }

                Phase::Finished => return None,
            }
        }
    }

    /// Adapts the machine into a plain event stream.
    pub fn into_event_stream(self) -> impl Stream<Item = Result<StreamEvent>> + Send {
        futures_util::stream::unfold(self, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
    }

    fn absorb(&mut self, chunk: &RawChunk) {
        if self.id.is_none() {
            self.id.clone_from(&chunk.id);
        }
        if self.model.is_none() {
            self.model.clone_from(&chunk.model);
        }
        if let Some(usage) = chunk.usage {
            if usage.total.unwrap_or(0) > 0 {
                self.usage = Some(usage);
            }
        }
        if let Some(stop) = &chunk.stop {
            self.stop = Some(stop.clone());
        }
    }

    fn close_content(&mut self, content: MessageContent) {
        self.content = Some(content);
        self.phase = Phase::ContentDone;
    }

    fn item_id(&self) -> String {
        self.id.clone().unwrap_or_default()
    }

    fn partial_response(&self) -> ModelResponse {
        ModelResponse {
            id: self.id.clone(),
            model: self.model.clone(),
            ..ModelResponse::default()
        }
    }

    fn final_response(&mut self) -> ModelResponse {
        ModelResponse {
            id: self.id.clone(),
            model: self.model.clone(),
            items: self.item.take().into_iter().collect(),
            usage: self.usage,
            stop: self.stop.take(),
            error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures_util::stream;
    use switchboard_core::Error;

    fn delta(fragment: &str) -> RawChunk {
        RawChunk {
            delta: Some(fragment.to_owned()),
            ..RawChunk::default()
        }
    }

    fn opening(fragment: &str) -> RawChunk {
        RawChunk {
            id: Some("chatcmpl-1".into()),
            model: Some("gpt-4o-mini".into()),
            role: Some(Role::Assistant),
            delta: Some(fragment.to_owned()),
            ..RawChunk::default()
        }
    }

    fn reconstructor(
        chunks: Vec<Result<RawChunk>>,
    ) -> Reconstructor<impl Stream<Item = Result<RawChunk>> + Unpin + Send> {
        Reconstructor::new(stream::iter(chunks))
    }

    fn done_item(content: &str) -> GeneratedItem {
        GeneratedItem::Message(MessageItem {
            id: "chatcmpl-1".into(),
            index: Some(0),
            content: Some(vec![MessageContent::Text(TextContent::complete(content))]),
        })
    }

    #[tokio::test]
    async fn hello_stream_emits_the_full_lifecycle() {
        let chunks = vec![
            Ok(opening("H")),
            Ok(delta("e")),
            Ok(delta("l")),
            Ok(delta("l")),
            Ok(delta("o")),
        ];
        let mut machine = reconstructor(chunks);

        let mut events = Vec::new();
        while let Some(event) = machine.next_event().await {
            events.push(event.unwrap());
        }

        let expected = vec![
            StreamEvent::Create(ModelResponse {
                id: Some("chatcmpl-1".into()),
                model: Some("gpt-4o-mini".into()),
                ..ModelResponse::default()
            }),
            StreamEvent::ItemAdded(GeneratedItem::Message(MessageItem {
                id: "chatcmpl-1".into(),
                index: Some(0),
                content: None,
            })),
            StreamEvent::ContentAdded(MessageContent::Text(TextContent {
                delta: Some("H".into()),
                content: Some("H".into()),
                annotations: Vec::new(),
            })),
            StreamEvent::ContentDelta(MessageContent::Text(TextContent::fragment("e"))),
            StreamEvent::ContentDelta(MessageContent::Text(TextContent::fragment("l"))),
            StreamEvent::ContentDelta(MessageContent::Text(TextContent::fragment("l"))),
            StreamEvent::ContentDelta(MessageContent::Text(TextContent::fragment("o"))),
            StreamEvent::ContentDone(MessageContent::Text(TextContent::complete("Hello"))),
            StreamEvent::ItemDone(done_item("Hello")),
            StreamEvent::Completed(ModelResponse {
                id: Some("chatcmpl-1".into()),
                model: Some("gpt-4o-mini".into()),
                items: vec![done_item("Hello")],
                ..ModelResponse::default()
            }),
        ];
        assert_eq!(events, expected);

        // Finished is absorbing.
        assert!(machine.next_event().await.is_none());
        assert!(machine.next_event().await.is_none());
    }

    #[tokio::test]
    async fn empty_source_still_opens_and_completes() {
        let mut machine = reconstructor(Vec::new());

        let first = machine.next_event().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::Create(ModelResponse::default()));

        let second = machine.next_event().await.unwrap().unwrap();
        assert_eq!(second, StreamEvent::Completed(ModelResponse::default()));

        assert!(machine.next_event().await.is_none());
    }

    #[tokio::test]
    async fn refusal_skips_the_delta_phase() {
        let chunks = vec![Ok(RawChunk {
            id: Some("chatcmpl-1".into()),
            refusal: Some("cannot comply".into()),
            ..RawChunk::default()
        })];
        let mut machine = reconstructor(chunks);

        let mut events = Vec::new();
        while let Some(event) = machine.next_event().await {
            events.push(event.unwrap());
        }

        let refusal = MessageContent::Refusal(RefusalContent {
            content: Some("cannot comply".into()),
        });
        assert_eq!(events.len(), 5);
        assert_eq!(events[2], StreamEvent::ContentDone(refusal.clone()));
        assert_eq!(
            events[3],
            StreamEvent::ItemDone(GeneratedItem::Message(MessageItem {
                id: "chatcmpl-1".into(),
                index: Some(0),
                content: Some(vec![refusal]),
            }))
        );
        assert!(matches!(events[4], StreamEvent::Completed(_)));
    }

    #[tokio::test]
    async fn bookkeeping_chunks_stay_silent_and_feed_the_summary() {
        let usage = TokenUsage {
            input: Some(3),
            output: Some(4),
            total: Some(7),
        };
        let chunks = vec![
            Ok(opening("Hi")),
            Ok(RawChunk {
                stop: Some(GenerationStop {
                    code: Some("length".into()),
                    message: None,
                }),
                ..RawChunk::default()
            }),
            Ok(RawChunk {
                usage: Some(usage),
                ..RawChunk::default()
            }),
        ];
        let mut machine = reconstructor(chunks);

        let mut events = Vec::new();
        while let Some(event) = machine.next_event().await {
            events.push(event.unwrap());
        }

        // No delta events for the stop or usage chunks.
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[3],
            StreamEvent::ContentDone(MessageContent::Text(TextContent::complete("Hi")))
        );
        let StreamEvent::Completed(response) = &events[5] else {
            panic!("expected a completed event, got {:?}", events[5]);
        };
        assert_eq!(response.usage, Some(usage));
        assert_eq!(
            response.stop,
            Some(GenerationStop {
                code: Some("length".into()),
                message: None,
            })
        );
    }

    #[tokio::test]
    async fn zero_total_usage_is_ignored() {
        let chunks = vec![
            Ok(opening("Hi")),
            Ok(RawChunk {
                usage: Some(TokenUsage {
                    input: Some(0),
                    output: Some(0),
                    total: Some(0),
                }),
                ..RawChunk::default()
            }),
        ];
        let mut machine = reconstructor(chunks);

        let mut last = None;
        while let Some(event) = machine.next_event().await {
            last = Some(event.unwrap());
        }
        let Some(StreamEvent::Completed(response)) = last else {
            panic!("stream did not complete");
        };
        assert_eq!(response.usage, None);
        assert_eq!(response.text(), "Hi");
    }

    #[tokio::test]
    async fn source_errors_finish_the_machine() {
        let chunks = vec![
            Ok(opening("a")),
            Err(Error::Transport("connection reset".into())),
        ];
        let mut machine = reconstructor(chunks);

        assert!(matches!(
            machine.next_event().await,
            Some(Ok(StreamEvent::Create(_)))
        ));
        assert!(matches!(
            machine.next_event().await,
            Some(Ok(StreamEvent::ItemAdded(_)))
        ));
        assert!(matches!(
            machine.next_event().await,
            Some(Ok(StreamEvent::ContentAdded(_)))
        ));
        assert!(matches!(
            machine.next_event().await,
            Some(Err(Error::Transport(_)))
        ));
        assert!(machine.next_event().await.is_none());
    }

    #[tokio::test]
    async fn event_stream_adapter_preserves_the_sequence() {
        let chunks = vec![Ok(opening("Hey")), Ok(delta(" there"))];
        let events: Vec<_> = reconstructor(chunks)
            .into_event_stream()
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 7);
        assert!(matches!(events[0], StreamEvent::Create(_)));
        let StreamEvent::Completed(response) = &events[6] else {
            panic!("expected a completed event, got {:?}", events[6]);
        };
        assert_eq!(response.text(), "Hey there");
    }
}
