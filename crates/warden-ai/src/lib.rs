//! Chat types and the OpenAI-compatible provider client for Warden.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiCompatibleClient, OpenAiConfig};
pub use types::{
    extract_tool_invocation, ChatRequest, Message, MessageRole, ModelClient, ModelTurn,
    ProviderError, StreamDeltaHandler, ToolInvocation, TOOL_END_MARKER, TOOL_START_MARKER,
};
