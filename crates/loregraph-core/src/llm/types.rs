//! Chat completion types for OpenAI-compatible APIs

use serde::{Deserialize, Serialize};

use crate::cost::TokenUsage;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Request body for chat completions
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier (e.g., "anthropic/claude-sonnet-4-20250514")
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage reported by the API
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop (end of response)
    Stop,
    /// Max tokens reached
    Length,
    /// Content filtered by safety system
    ContentFilter,
    Error,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Error => write!(f, "error"),
            FinishReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: Message,
    pub finish_reason: Option<FinishReason>,
}

/// Response from the chat completions API
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

/// Simplified completion result: text payload plus token counts
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    /// Model that generated the response
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// Build from the first choice of an API response
    pub fn from_chat_response(response: ChatResponse) -> Option<Self> {
        let choice = response.choices.first()?;
        let usage = response.usage.as_ref();

        Some(Self {
            content: choice.message.content.clone(),
            model: response.model,
            input_tokens: usage.map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: usage.map(|u| u.completion_tokens).unwrap_or(0),
            finish_reason: choice
                .finish_reason
                .clone()
                .unwrap_or(FinishReason::Unknown),
        })
    }

    /// Construct a response directly, e.g. from a scripted service
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn with_tokens(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.input_tokens, self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let system = Message::system("You extract entities");
        assert_eq!(system.role, MessageRole::System);
        assert_eq!(system.content, "You extract entities");
        assert_eq!(Message::user("Hello!").role, MessageRole::User);
        assert_eq!(Message::assistant("Hi").role, MessageRole::Assistant);
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest::new("test-model", vec![Message::user("Hello")])
            .with_temperature(0.5)
            .with_max_tokens(128);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"test-model\""));
        assert!(json.contains("\"temperature\":0.5"));
        assert!(json.contains("\"max_tokens\":128"));
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_omits_unset_options() {
        let request = ChatRequest::new("m", vec![]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_chat_response_deserialization() {
        let json = r#"{
            "id": "gen-123",
            "object": "chat.completion",
            "created": 1234567890,
            "model": "anthropic/claude-sonnet-4-20250514",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"entities\": []}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }"#;

        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let simplified = LlmResponse::from_chat_response(response).unwrap();
        assert_eq!(simplified.content, "{\"entities\": []}");
        assert_eq!(simplified.input_tokens, 120);
        assert_eq!(simplified.output_tokens, 30);
        assert_eq!(simplified.finish_reason, FinishReason::Stop);
        assert_eq!(simplified.usage().total(), 150);
    }

    #[test]
    fn test_unknown_finish_reason() {
        let json = r#"{
            "id": "gen-1",
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "x"},
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let simplified = LlmResponse::from_chat_response(response).unwrap();
        assert_eq!(simplified.finish_reason, FinishReason::Unknown);
        assert_eq!(simplified.input_tokens, 0);
    }

    #[test]
    fn test_empty_choices() {
        let json = r#"{"id": "gen-1", "model": "m", "choices": []}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(LlmResponse::from_chat_response(response).is_none());
    }
}
