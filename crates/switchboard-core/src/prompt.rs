//! Prompt and instruction shapes.

use crate::content::Input;
use serde::{Deserialize, Serialize};

/// Standing instructions sent ahead of history and inputs.
///
/// Persisted either as a bare string or as a list of role-tagged inputs;
/// both forms decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instructions {
    /// A single instruction string, delivered as one system message.
    Text(String),
    /// Role-tagged instruction inputs.
    Inputs(Vec<Input>),
}

impl Instructions {
    /// Plain-text instructions.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

impl From<&str> for Instructions {
    fn from(content: &str) -> Self {
        Self::Text(content.to_owned())
    }
}

fn default_stream() -> bool {
    true
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Server-side conversation to resume, for providers that store state.
    #[serde(rename = "conversationID", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Standing instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Instructions>,
    /// This turn's input content.
    pub inputs: Vec<Input>,
    /// Ask the provider to persist the response server-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    /// Whether the response should be streamed.
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff.
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Upper bound on generated tokens.
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for Prompt {
    fn default() -> Self {
        Self {
            conversation_id: None,
            instructions: None,
            inputs: Vec::new(),
            store: None,
            stream: true,
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }
}

impl Prompt {
    /// A streaming prompt with the given inputs.
    pub fn new(inputs: Vec<Input>) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    /// A streaming prompt with a single user text input.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![Input::user(content)])
    }

    /// Replaces the instructions.
    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Sets the stream flag.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_instructions_encode_as_bare_string() {
        let instructions = Instructions::text("Hi");
        assert_eq!(serde_json::to_string(&instructions).unwrap(), "\"Hi\"");
        let decoded: Instructions = serde_json::from_str("\"Hi\"").unwrap();
        assert_eq!(decoded, instructions);
    }

    #[test]
    fn input_instructions_encode_as_tagged_list() {
        let instructions = Instructions::Inputs(vec![Input::system("Hi")]);
        let value = serde_json::to_value(&instructions).unwrap();
        assert_eq!(
            value,
            json!([{"role": "system", "content": "Hi", "type": "text"}])
        );
        let decoded: Instructions = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, instructions);
    }

    #[test]
    fn prompt_uses_wire_field_names() {
        let prompt = Prompt {
            conversation_id: Some("conv-1".into()),
            top_p: Some(0.9),
            max_tokens: Some(256),
            ..Prompt::text("Hello")
        };
        let value = serde_json::to_value(&prompt).unwrap();
        assert_eq!(value["conversationID"], "conv-1");
        assert_eq!(value["topP"], 0.9);
        assert_eq!(value["maxTokens"], 256);
        assert_eq!(value["stream"], true);
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn stream_defaults_to_true_on_decode() {
        let prompt: Prompt = serde_json::from_value(json!({"inputs": []})).unwrap();
        assert!(prompt.stream);
        assert!(prompt.inputs.is_empty());
    }

    #[test]
    fn with_stream_flips_the_flag() {
        let prompt = Prompt::text("x").with_stream(false);
        assert!(!prompt.stream);
    }
}
