use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Opens a tool invocation block in model output.
pub const TOOL_START_MARKER: &str = "[[tool]]";
/// Closes a tool invocation block; also sent as a stop sequence.
pub const TOOL_END_MARKER: &str = "[[/tool]]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation turn; serializes directly as an OpenAI-style chat
/// message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop: Vec<String>,
}

/// Typed form of the tool invocation payload a model emits between the
/// markers: `{"tool": name, "args": ...}` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Option<Value>,
}

/// One completed assistant turn. `tool_payload` is the raw text between the
/// invocation markers, unparsed so the agent loop can feed malformed JSON
/// back to the model as a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub tool_payload: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type StreamDeltaHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Provider capability surface the agent loop drives: turn the history into
/// a request, then stream one assistant turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn prepare_request(&self, history: &[Message]) -> ChatRequest;

    async fn stream_turn(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ModelTurn, ProviderError>;
}

/// Splits model output into the prose before a tool invocation block and the
/// raw payload inside it.
///
/// The closing marker is searched first and the opening marker is the last
/// one before it. The end marker doubles as a stop sequence, which the
/// provider consumes, so a trailing unterminated block with a non-empty
/// remainder also counts as a complete payload.
pub fn extract_tool_invocation(text: &str) -> (String, Option<String>) {
    if let Some(end) = text.find(TOOL_END_MARKER) {
        if let Some(start) = text[..end].rfind(TOOL_START_MARKER) {
            let payload = text[start + TOOL_START_MARKER.len()..end].trim();
            let prose = text[..start].trim_end();
            return (prose.to_string(), Some(payload.to_string()));
        }
        return (text.to_string(), None);
    }

    if let Some(start) = text.rfind(TOOL_START_MARKER) {
        let payload = text[start + TOOL_START_MARKER.len()..].trim();
        if !payload.is_empty() {
            let prose = text[..start].trim_end();
            return (prose.to_string(), Some(payload.to_string()));
        }
    }

    (text.to_string(), None)
}
