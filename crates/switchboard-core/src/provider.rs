//! Provider identity and model addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The wire protocol family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// The OpenAI Responses API.
    #[serde(rename = "OpenAI")]
    OpenAi,
    /// Any service exposing the OpenAI chat-completions API.
    #[serde(rename = "OpenAICompatible")]
    OpenAiCompatible,
    /// The Google Gemini API.
    Gemini,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAi => "OpenAI",
            Self::OpenAiCompatible => "OpenAICompatible",
            Self::Gemini => "Gemini",
        };
        f.write_str(name)
    }
}

/// Connection settings for one provider endpoint.
///
/// Both `Display` and `Debug` mask the API key, so configs can be logged
/// without leaking the credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Protocol family used to talk to this provider.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Human-readable provider name, used in logs and error maps.
    pub name: String,
    /// Bearer credential sent with every request.
    #[serde(rename = "apiKey")]
    pub api_key: String,
    /// Base URL of the provider endpoint.
    #[serde(rename = "apiURL")]
    pub api_url: String,
}

impl ProviderConfig {
    /// Creates a provider config.
    pub fn new(
        kind: ProviderKind,
        name: impl Into<String>,
        api_key: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("api_key", &mask_key(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} at {}, key {})",
            self.name,
            self.kind,
            self.api_url,
            mask_key(&self.api_key)
        )
    }
}

/// Renders a credential as its first and last four characters. Keys too
/// short to safely expose either end render as `****`.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_owned();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// A model identifier as understood by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Model {
    /// Model name, e.g. `"gpt-4o-mini"`.
    pub name: String,
}

impl Model {
    /// Creates a model identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<&str> for Model {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Model {
    fn from(name: String) -> Self {
        Self { name }
    }
}

/// One concrete (provider, model) pair nominated as a call target.
///
/// The whole value is the identity: the same model name on two providers is
/// two distinct references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelReference {
    /// The model to request.
    pub model: Model,
    /// The provider to request it from.
    pub provider: ProviderConfig,
}

impl ModelReference {
    /// Creates a model reference.
    pub fn new(model: impl Into<Model>, provider: ProviderConfig) -> Self {
        Self {
            model: model.into(),
            provider,
        }
    }

    /// Reporting key for logs and error maps: `"<provider>/<model>"`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.provider.name, self.model.name)
    }
}

/// An ordered fallback chain of model references for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedModel {
    /// Label for this chain, used in logs.
    pub name: String,
    /// Candidates in preference order.
    pub models: Vec<ModelReference>,
}

impl QualifiedModel {
    /// Creates a fallback chain.
    pub fn new(name: impl Into<String>, models: Vec<ModelReference>) -> Self {
        Self {
            name: name.into(),
            models,
        }
    }
}
