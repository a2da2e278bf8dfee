//! Adapter for the OpenAI chat-completions protocol.
//!
//! This is the lingua franca of self-hosted and third-party inference
//! servers, so the adapter assumes nothing beyond the protocol itself: the
//! whole conversation is replayed as a flat message list on every call, and
//! streaming replies are raw deltas that [`Reconstructor`] rebuilds into
//! lifecycle events.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use switchboard_core::{
    Conversation, ConversationItem, Error, GeneratedItem, GenerationStop, Input, Instructions,
    MessageContent, MessageItem, ModelReference, ModelResponse, Prompt, RefusalContent, Result,
    Role, TextContent, TokenUsage,
};
use tracing::debug;

use crate::providers::{
    endpoint, ensure_event_stream, ensure_success, EventStream, ProviderAdapter, SseLines,
};
use crate::reconstruct::{RawChunk, Reconstructor};
use crate::transport::{Transport, TransportRequest};

/// Speaks `POST {base}/chat/completions`, buffered or streamed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatibleAdapter;

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn generate(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        conversation: &Conversation,
    ) -> Result<ModelResponse> {
        let url = endpoint(&reference.provider, "chat/completions")?;
        debug!(model = %reference.name(), url = %url, "chat-completions generate");
        let request = TransportRequest {
            url,
            api_key: reference.provider.api_key.clone(),
            body: request_body(&reference.model.name, prompt, conversation, false),
        };
        let response = ensure_success(transport.send(request).await?).await?;
        let text = response.into_text().await?;
        if text.is_empty() {
            return Err(Error::EmptyResponseBody);
        }
        let value: Value = serde_json::from_str(&text)?;
        Ok(parse_completion(&value))
    }

    async fn stream(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        conversation: &Conversation,
    ) -> Result<EventStream> {
        let url = endpoint(&reference.provider, "chat/completions")?;
        debug!(model = %reference.name(), url = %url, "chat-completions stream");
        let request = TransportRequest {
            url,
            api_key: reference.provider.api_key.clone(),
            body: request_body(&reference.model.name, prompt, conversation, true),
        };
        let response = ensure_success(transport.send(request).await?).await?;
        let response = ensure_event_stream(response)?;
        let chunks = chunk_stream(SseLines::new(response.body));
        Ok(Reconstructor::new(chunks).into_event_stream().boxed())
    }
}

fn chunk_stream(lines: SseLines) -> BoxStream<'static, Result<RawChunk>> {
    futures_util::stream::unfold(lines, |mut lines| async move {
        let data = lines.next_data().await?;
        let chunk = data.and_then(|data| decode_chunk(&data));
        Some((chunk, lines))
    })
    .boxed()
}

/// Builds the chat-completions request body.
///
/// Message order is fixed: instructions, then prior conversation, then this
/// turn's inputs. History entries that restate the prompt's instructions are
/// dropped so resending a stored conversation does not double the system
/// message.
fn request_body(model: &str, prompt: &Prompt, conversation: &Conversation, stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": build_messages(prompt, conversation),
        "stream": stream,
    });
    if stream {
        // Without this the final usage chunk never arrives.
        body["stream_options"] = json!({"include_usage": true});
    }
    if let Some(store) = prompt.store {
        body["store"] = json!(store);
    }
    if let Some(temperature) = prompt.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = prompt.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(max_tokens) = prompt.max_tokens {
        body["max_completion_tokens"] = json!(max_tokens);
    }
    body
}

fn build_messages(prompt: &Prompt, conversation: &Conversation) -> Vec<Value> {
    let mut messages = Vec::new();
    match &prompt.instructions {
        Some(Instructions::Text(text)) => {
            messages.push(json!({"role": Role::System, "content": text}));
        }
        Some(Instructions::Inputs(inputs)) => {
            messages.extend(inputs.iter().map(input_message));
        }
        None => {}
    }
    for item in &conversation.items {
        match item {
            ConversationItem::Input(input) => {
                let restated = prompt
                    .instructions
                    .as_ref()
                    .is_some_and(|instructions| restates_instructions(input, instructions));
                if !restated {
                    messages.push(input_message(input));
                }
            }
            ConversationItem::Generated(item) => messages.push(generated_message(item)),
        }
    }
    messages.extend(prompt.inputs.iter().map(input_message));
    messages
}

/// True when a history entry duplicates the prompt's standing instructions.
fn restates_instructions(input: &Input, instructions: &Instructions) -> bool {
    match instructions {
        Instructions::Text(text) => {
            matches!(input, Input::Text(t) if t.role == Role::System && t.content == *text)
        }
        Instructions::Inputs(inputs) => inputs.contains(input),
    }
}

fn input_message(input: &Input) -> Value {
    json!({"role": input.role(), "content": [content_part(input)]})
}

fn content_part(input: &Input) -> Value {
    match input {
        Input::Text(text) => json!({"type": "text", "text": text.content}),
        Input::File(file) => {
            let mut payload = json!({"file_data": file.content});
            if let Some(id) = &file.id {
                payload["file_id"] = json!(id);
            }
            if let Some(filename) = &file.filename {
                payload["filename"] = json!(filename);
            }
            json!({"type": "file", "file": payload})
        }
    }
}

fn generated_message(item: &GeneratedItem) -> Value {
    let GeneratedItem::Message(message) = item;
    let mut parts = Vec::new();
    let mut refusal = None;
    for block in message.content.iter().flatten() {
        match block {
            MessageContent::Text(text) => {
                if let Some(content) = &text.content {
                    parts.push(json!({"type": "text", "text": content}));
                }
            }
            MessageContent::Refusal(block) => refusal = block.content.clone(),
        }
    }
    let mut value = json!({"role": Role::Assistant, "content": parts});
    if let Some(refusal) = refusal {
        value["refusal"] = json!(refusal);
    }
    value
}

/// Maps a buffered chat-completion reply onto the unified response.
///
/// The reply's single choice becomes a one-item response; the item borrows
/// the response id and sits at index 0, since the protocol has no item ids
/// of its own.
fn parse_completion(value: &Value) -> ModelResponse {
    let choice = &value["choices"][0];
    let message = &choice["message"];
    let mut content = Vec::new();
    if let Some(text) = message["content"].as_str() {
        content.push(MessageContent::Text(TextContent::complete(text)));
    } else if let Some(refusal) = message["refusal"].as_str() {
        content.push(MessageContent::Refusal(RefusalContent {
            content: Some(refusal.to_owned()),
        }));
    }
    let item = GeneratedItem::Message(MessageItem {
        id: value["id"].as_str().unwrap_or_default().to_owned(),
        index: Some(0),
        content: Some(content),
    });
    ModelResponse {
        id: value["id"].as_str().map(str::to_owned),
        model: value["model"].as_str().map(str::to_owned),
        items: vec![item],
        usage: completion_usage(&value["usage"]),
        stop: finish_stop(choice),
        error: None,
    }
}

fn decode_chunk(data: &str) -> Result<RawChunk> {
    let value: Value = serde_json::from_str(data)?;
    let choice = &value["choices"][0];
    let delta = &choice["delta"];
    Ok(RawChunk {
        id: value["id"].as_str().map(str::to_owned),
        model: value["model"].as_str().map(str::to_owned),
        role: delta["role"].as_str().and_then(parse_role),
        delta: delta["content"].as_str().map(str::to_owned),
        refusal: delta["refusal"].as_str().map(str::to_owned),
        stop: finish_stop(choice),
        usage: completion_usage(&value["usage"]),
    })
}

fn finish_stop(choice: &Value) -> Option<GenerationStop> {
    choice["finish_reason"].as_str().map(|code| GenerationStop {
        code: Some(code.to_owned()),
        message: None,
    })
}

fn completion_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.as_object()?;
    Some(TokenUsage {
        input: usage.get("prompt_tokens").and_then(Value::as_u64),
        output: usage.get("completion_tokens").and_then(Value::as_u64),
        total: usage.get("total_tokens").and_then(Value::as_u64),
    })
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "system" => Some(Role::System),
        "assistant" => Some(Role::Assistant),
        "user" => Some(Role::User),
        "developer" => Some(Role::Developer),
        _ => None,
    }
}
