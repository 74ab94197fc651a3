//! Common types used by the provider trait and implementations.

use serde::{Deserialize, Serialize};

/// Provider selection stored on an agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider name (e.g., "echo", "anthropic").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// System prompt sent with every llm-call step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Maximum tokens in a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            model: "echo-1".to_string(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// A message in provider-native format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// Message role (user, assistant).
    pub role: String,
    /// Text content.
    pub content: String,
}

impl ProviderMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request to a provider.
#[derive(Debug, Clone)]
pub struct Request {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ProviderMessage>,
    /// System prompt.
    pub system: Option<String>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl Request {
    /// Single-turn request built from an agent's provider config.
    pub fn from_prompt(config: &ProviderConfig, prompt: impl Into<String>) -> Self {
        Self {
            model: config.model.clone(),
            messages: vec![ProviderMessage::user(prompt)],
            system: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Non-streaming response from a provider.
#[derive(Debug, Clone)]
pub struct Response {
    /// Generated text.
    pub text: String,
    /// Stop reason.
    pub stop_reason: StopReason,
    /// Token usage.
    pub usage: Usage,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    pub input_tokens: usize,
    /// Output tokens generated.
    pub output_tokens: usize,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal end of response.
    EndTurn,
    /// Max tokens reached.
    MaxTokens,
    /// Stop sequence matched.
    StopSequence,
}

/// Events emitted during streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of text output.
    TextDelta { delta: String },
    /// Token usage update.
    Usage { input: usize, output: usize },
    /// Stream completed.
    Done { reason: StopReason },
    /// Stream error.
    Error(String),
}

/// Information about a model supported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Maximum context window in tokens.
    pub context_window: usize,
    /// Maximum output tokens.
    pub max_output_tokens: usize,
}
