//! Conversation loop, role-gated tool dispatch, and output hygiene for
//! Warden.
mod agent;
mod router;
mod sanitize;

pub use agent::{Agent, AgentConfig, AgentError};
pub use router::{AgentTool, Role, ToolDefinition, ToolOutcome, ToolRouter};
pub use sanitize::{sanitize_tool_response, DEFAULT_RESPONSE_CHAR_BUDGET};
