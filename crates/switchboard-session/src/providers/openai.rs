//! Adapter for the OpenAI Responses protocol.
//!
//! Unlike chat completions, this protocol already frames its stream as
//! lifecycle events, so streaming is a near one-to-one translation keyed by
//! each payload's `type` field rather than a reconstruction. Requests carry
//! only the prompt; prior turns are resumed server-side through
//! `previous_response_id`, never replayed.

use futures_util::StreamExt;
use serde_json::{json, Value};
use switchboard_core::{
    Conversation, Error, GeneratedItem, GenerationError, GenerationStop, Input, Instructions,
    MessageContent, MessageItem, ModelReference, ModelResponse, Prompt, RefusalContent, Result,
    Role, StreamEvent, TextContent, TokenUsage,
};
use tracing::debug;

use crate::providers::{
    endpoint, ensure_event_stream, ensure_success, EventStream, ProviderAdapter, SseLines,
};
use crate::transport::{Transport, TransportRequest};

/// Speaks `POST {base}/responses`, buffered or streamed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn generate(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        _conversation: &Conversation,
    ) -> Result<ModelResponse> {
        let url = endpoint(&reference.provider, "responses")?;
        debug!(model = %reference.name(), url = %url, "responses generate");
        let request = TransportRequest {
            url,
            api_key: reference.provider.api_key.clone(),
            body: request_body(&reference.model.name, prompt, false),
        };
        let response = ensure_success(transport.send(request).await?).await?;
        let text = response.into_text().await?;
        if text.is_empty() {
            return Err(Error::EmptyResponseBody);
        }
        let value: Value = serde_json::from_str(&text)?;
        Ok(parse_response(&value))
    }

    async fn stream(
        &self,
        transport: &dyn Transport,
        reference: &ModelReference,
        prompt: &Prompt,
        _conversation: &Conversation,
    ) -> Result<EventStream> {
        let url = endpoint(&reference.provider, "responses")?;
        debug!(model = %reference.name(), url = %url, "responses stream");
        let request = TransportRequest {
            url,
            api_key: reference.provider.api_key.clone(),
            body: request_body(&reference.model.name, prompt, true),
        };
        let response = ensure_success(transport.send(request).await?).await?;
        let response = ensure_event_stream(response)?;
        let lines = SseLines::new(response.body);
        // A decode failure is terminal: the error is yielded once and the
        // stream ends on the next pull.
        let events = futures_util::stream::unfold((lines, false), |(mut lines, done)| async move {
            if done {
                return None;
            }
            loop {
                let data = match lines.next_data().await? {
                    Ok(data) => data,
                    Err(error) => return Some((Err(error), (lines, true))),
                };
                match decode_event(&data) {
                    Ok(Some(event)) => return Some((Ok(event), (lines, false))),
                    Ok(None) => continue,
                    Err(error) => return Some((Err(error), (lines, true))),
                }
            }
        });
        Ok(events.boxed())
    }
}

/// Builds the Responses request body from the prompt alone.
///
/// Text instructions ride the dedicated `instructions` field; instruction
/// input lists are prepended to the turn inputs instead, since the field
/// only accepts a string.
fn request_body(model: &str, prompt: &Prompt, stream: bool) -> Value {
    let mut inputs: Vec<&Input> = Vec::new();
    if let Some(Instructions::Inputs(list)) = &prompt.instructions {
        inputs.extend(list.iter());
    }
    inputs.extend(prompt.inputs.iter());

    let mut body = json!({
        "model": model,
        "input": grouped_messages(&inputs),
        "stream": stream,
    });
    if let Some(Instructions::Text(text)) = &prompt.instructions {
        body["instructions"] = json!(text);
    }
    if let Some(id) = &prompt.conversation_id {
        body["previous_response_id"] = json!(id);
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
        body["max_output_tokens"] = json!(max_tokens);
    }
    body
}

/// Folds consecutive same-role inputs into one message item.
fn grouped_messages(inputs: &[&Input]) -> Vec<Value> {
    let mut groups: Vec<(Role, Vec<Value>)> = Vec::new();
    for input in inputs {
        let role = input.role();
        let part = input_part(input);
        match groups.last_mut() {
            Some((last, parts)) if *last == role => parts.push(part),
            _ => groups.push((role, vec![part])),
        }
    }
    groups
        .into_iter()
        .map(|(role, parts)| json!({"role": role, "content": parts}))
        .collect()
}

fn input_part(input: &Input) -> Value {
    match input {
        Input::Text(text) => json!({"type": "input_text", "text": text.content}),
        Input::File(file) => {
            let mut part = json!({"type": "input_file", "file_data": file.content});
            if let Some(id) = &file.id {
                part["file_id"] = json!(id);
            }
            if let Some(filename) = &file.filename {
                part["filename"] = json!(filename);
            }
            part
        }
    }
}

/// Maps a buffered Responses reply onto the unified response.
fn parse_response(value: &Value) -> ModelResponse {
    let items = value["output"]
        .as_array()
        .map(|output| {
            output
                .iter()
                .enumerate()
                .filter_map(|(index, item)| message_item(item, Some(index as u32)))
                .collect()
        })
        .unwrap_or_default();
    let stop = value["incomplete_details"]["reason"]
        .as_str()
        .map(|reason| GenerationStop {
            code: None,
            message: Some(reason.to_owned()),
        });
    let error = value["error"].as_object().map(|error| GenerationError {
        code: error.get("code").and_then(Value::as_str).map(str::to_owned),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
    });
    ModelResponse {
        id: value["id"].as_str().map(str::to_owned),
        model: value["model"].as_str().map(str::to_owned),
        items,
        usage: response_usage(&value["usage"]),
        stop,
        error,
    }
}

/// Translates one stream payload, keyed by its `type` field.
///
/// Payload types with no counterpart in the unified lifecycle (text `done`
/// markers, `in_progress` notices, and anything newer) are dropped.
fn decode_event(data: &str) -> Result<Option<StreamEvent>> {
    let value: Value = serde_json::from_str(data)?;
    Ok(translate(&value))
}

fn translate(value: &Value) -> Option<StreamEvent> {
    match value["type"].as_str()? {
        "response.created" => {
            let response = &value["response"];
            Some(StreamEvent::Create(ModelResponse {
                id: response["id"].as_str().map(str::to_owned),
                model: response["model"].as_str().map(str::to_owned),
                ..ModelResponse::default()
            }))
        }
        "response.output_item.added" => item_event(value).map(StreamEvent::ItemAdded),
        "response.content_part.added" => {
            message_content(&value["part"]).map(StreamEvent::ContentAdded)
        }
        "response.output_text.delta" => value["delta"].as_str().map(|delta| {
            StreamEvent::ContentDelta(MessageContent::Text(TextContent::fragment(delta)))
        }),
        "response.content_part.done" => {
            message_content(&value["part"]).map(StreamEvent::ContentDone)
        }
        "response.output_item.done" => item_event(value).map(StreamEvent::ItemDone),
        "response.completed" | "response.incomplete" | "response.failed" => {
            Some(StreamEvent::Completed(parse_response(&value["response"])))
        }
        "error" => Some(StreamEvent::Completed(ModelResponse {
            error: Some(GenerationError {
                code: value["code"].as_str().map(str::to_owned),
                message: value["message"].as_str().map(str::to_owned),
            }),
            ..ModelResponse::default()
        })),
        _ => None,
    }
}

fn item_event(value: &Value) -> Option<GeneratedItem> {
    let index = value["output_index"].as_u64().map(|index| index as u32);
    message_item(&value["item"], index)
}

/// Maps an output entry to a message item; non-message entries are dropped.
fn message_item(item: &Value, index: Option<u32>) -> Option<GeneratedItem> {
    if item["type"].as_str()? != "message" {
        return None;
    }
    let content: Vec<MessageContent> = item["content"]
        .as_array()
        .map(|parts| parts.iter().filter_map(message_content).collect())
        .unwrap_or_default();
    Some(GeneratedItem::Message(MessageItem {
        id: item["id"].as_str().unwrap_or_default().to_owned(),
        index,
        content: (!content.is_empty()).then_some(content),
    }))
}

fn message_content(part: &Value) -> Option<MessageContent> {
    match part["type"].as_str()? {
        "output_text" => Some(MessageContent::Text(TextContent::complete(
            part["text"].as_str().unwrap_or_default(),
        ))),
        "refusal" => Some(MessageContent::Refusal(RefusalContent {
            content: part["refusal"].as_str().map(str::to_owned),
        })),
        _ => None,
    }
}

fn response_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.as_object()?;
    Some(TokenUsage {
        input: usage.get("input_tokens").and_then(Value::as_u64),
        output: usage.get("output_tokens").and_then(Value::as_u64),
        total: usage.get("total_tokens").and_then(Value::as_u64),
    })
}
