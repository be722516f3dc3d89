use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use warden_ai::{Message, ModelClient, ProviderError, StreamDeltaHandler};

use crate::{
    router::{Role, ToolRouter},
    sanitize::{sanitize_tool_response, DEFAULT_RESPONSE_CHAR_BUDGET},
};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model turns allowed per user prompt; each may carry one tool call.
    pub max_tool_iterations: usize,
    /// Character budget applied to sanitized tool output.
    pub response_char_budget: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 4,
            response_char_budget: DEFAULT_RESPONSE_CHAR_BUDGET,
        }
    }
}

/// The conversation driver: owns the history, prompts the model, and feeds
/// tool results back as conversation turns until the model answers without
/// requesting a tool.
pub struct Agent {
    client: Arc<dyn ModelClient>,
    router: ToolRouter,
    role: Role,
    config: AgentConfig,
    history: Vec<Message>,
}

impl Agent {
    pub fn new(
        client: Arc<dyn ModelClient>,
        router: ToolRouter,
        role: Role,
        system_prompt: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            router,
            role,
            config,
            history: vec![Message::system(system_prompt)],
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Runs one user prompt to completion and returns the last assistant
    /// answer.
    pub async fn prompt(&mut self, text: &str) -> Result<String, AgentError> {
        self.prompt_with_output(text, None).await
    }

    /// Like [`Agent::prompt`], forwarding assistant text deltas to
    /// `on_delta` as they stream in.
    pub async fn prompt_with_output(
        &mut self,
        text: &str,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<String, AgentError> {
        self.history.push(Message::user(text));

        let mut last_answer = String::new();
        let mut exhausted = true;

        for _ in 0..self.config.max_tool_iterations {
            let request = self.client.prepare_request(&self.history);
            let turn = self.client.stream_turn(request, on_delta.clone()).await?;

            if !turn.text.trim().is_empty() {
                self.history.push(Message::assistant(turn.text.clone()));
                last_answer = turn.text;
            }

            let Some(payload) = turn.tool_payload else {
                exhausted = false;
                break;
            };

            let result = self.process_tool_payload(&payload).await;
            let sanitized = sanitize_tool_response(&result, self.config.response_char_budget);
            info!(target: "tool_audit", result = %sanitized, "tool result");
            self.history
                .push(Message::tool(format!("Tool result: {sanitized}")));
        }

        if exhausted {
            warn!(
                max_tool_iterations = self.config.max_tool_iterations,
                "reached maximum number of tool iterations"
            );
        }

        Ok(last_answer)
    }

    /// Parses the raw payload from a tagged block and routes it. Malformed
    /// JSON becomes an error string the model sees as the tool result.
    async fn process_tool_payload(&self, payload: &str) -> String {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => self.router.dispatch(self.role, &value).await,
            Err(error) => format!("Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use warden_ai::{
        ChatRequest, Message, MessageRole, ModelClient, ModelTurn, ProviderError,
        StreamDeltaHandler, TOOL_END_MARKER,
    };

    use super::{Agent, AgentConfig, AgentError};
    use crate::router::{AgentTool, Role, ToolDefinition, ToolOutcome, ToolRouter};

    struct ScriptedClient {
        turns: Mutex<VecDeque<ModelTurn>>,
    }

    impl ScriptedClient {
        fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        fn prepare_request(&self, history: &[Message]) -> ChatRequest {
            ChatRequest {
                model: "scripted".to_string(),
                messages: history.to_vec(),
                max_tokens: None,
                temperature: None,
                stop: vec![TOOL_END_MARKER.to_string()],
            }
        }

        async fn stream_turn(
            &self,
            _request: ChatRequest,
            on_delta: Option<StreamDeltaHandler>,
        ) -> Result<ModelTurn, ProviderError> {
            let turn = self
                .turns
                .lock()
                .expect("script lock")
                .pop_front()
                .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".to_string()))?;
            if let Some(handler) = on_delta {
                handler(turn.text.clone());
            }
            Ok(turn)
        }
    }

    struct UppercaseTool;

    #[async_trait]
    impl AgentTool for UppercaseTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "uppercase".to_string(),
                description: "Uppercases a word".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "word": { "type": "string" }
                    },
                    "required": ["word"]
                }),
            }
        }

        async fn execute(&self, arguments: Value) -> ToolOutcome {
            let word = arguments["word"].as_str().unwrap_or_default();
            ToolOutcome::ok(json!({ "word": word.to_uppercase() }))
        }
    }

    fn router() -> ToolRouter {
        let mut router = ToolRouter::new();
        router.register(Arc::new(UppercaseTool));
        router
    }

    fn agent(turns: Vec<ModelTurn>) -> Agent {
        Agent::new(
            ScriptedClient::new(turns),
            router(),
            Role::Default,
            "you can call tools",
            AgentConfig::default(),
        )
    }

    fn plain_turn(text: &str) -> ModelTurn {
        ModelTurn {
            text: text.to_string(),
            tool_payload: None,
        }
    }

    fn tool_turn(text: &str, payload: &str) -> ModelTurn {
        ModelTurn {
            text: text.to_string(),
            tool_payload: Some(payload.to_string()),
        }
    }

    #[tokio::test]
    async fn functional_plain_answer_ends_the_loop_after_one_turn() {
        let mut agent = agent(vec![plain_turn("the answer is four")]);

        let answer = agent.prompt("what is 2+2?").await.expect("prompt");

        assert_eq!(answer, "the answer is four");
        let roles: Vec<MessageRole> = agent.history().iter().map(|turn| turn.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
        );
    }

    #[tokio::test]
    async fn functional_tool_result_feeds_the_next_turn() {
        let mut agent = agent(vec![
            tool_turn(
                "Let me transform that.",
                r#"{"tool":"uppercase","args":{"word":"warden"}}"#,
            ),
            plain_turn("It becomes WARDEN."),
        ]);

        let answer = agent.prompt("uppercase warden").await.expect("prompt");

        assert_eq!(answer, "It becomes WARDEN.");
        let tool_turns: Vec<&Message> = agent
            .history()
            .iter()
            .filter(|turn| turn.role == MessageRole::Tool)
            .collect();
        assert_eq!(tool_turns.len(), 1);
        assert_eq!(
            tool_turns[0].content,
            "Tool result: {\"word\":\"WARDEN\"}"
        );
    }

    #[tokio::test]
    async fn functional_malformed_payload_becomes_tool_feedback_not_a_crash() {
        let mut agent = agent(vec![
            tool_turn("Trying a tool.", r#"{"tool": "uppercase", "args":"#),
            plain_turn("I sent malformed JSON, sorry."),
        ]);

        let answer = agent.prompt("go").await.expect("prompt");

        assert_eq!(answer, "I sent malformed JSON, sorry.");
        let tool_turn = agent
            .history()
            .iter()
            .find(|turn| turn.role == MessageRole::Tool)
            .expect("tool feedback turn");
        assert!(tool_turn.content.starts_with("Tool result: Error: "));
    }

    #[tokio::test]
    async fn functional_unauthorized_payload_is_reported_through_the_gate() {
        let mut agent = agent(vec![
            tool_turn("Escalating.", r#"{"tool":"shutdown","args":{}}"#),
            plain_turn("That tool does not exist."),
        ]);

        agent.prompt("shut the box down").await.expect("prompt");

        let tool_turn = agent
            .history()
            .iter()
            .find(|turn| turn.role == MessageRole::Tool)
            .expect("tool feedback turn");
        assert_eq!(
            tool_turn.content,
            "Tool result: {\"error\":\"Invalid request format or unauthorized tool access.\"}"
        );
    }

    #[tokio::test]
    async fn regression_iteration_bound_stops_an_endless_tool_chain() {
        let payload = r#"{"tool":"uppercase","args":{"word":"loop"}}"#;
        let turns = (0..8)
            .map(|_| tool_turn("again", payload))
            .collect::<Vec<_>>();
        let mut agent = Agent::new(
            ScriptedClient::new(turns),
            router(),
            Role::Default,
            "system",
            AgentConfig {
                max_tool_iterations: 3,
                ..AgentConfig::default()
            },
        );

        agent.prompt("loop forever").await.expect("prompt");

        let tool_turns = agent
            .history()
            .iter()
            .filter(|turn| turn.role == MessageRole::Tool)
            .count();
        assert_eq!(tool_turns, 3);
    }

    #[tokio::test]
    async fn functional_long_tool_output_is_truncated_before_reentering_history() {
        struct NoisyTool;

        #[async_trait]
        impl AgentTool for NoisyTool {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "noisy".to_string(),
                    description: "Produces a large result".to_string(),
                    parameters: json!({ "type": "object" }),
                }
            }

            async fn execute(&self, _arguments: Value) -> ToolOutcome {
                ToolOutcome::ok(json!("x".repeat(500)))
            }
        }

        let mut router = ToolRouter::new();
        router.register(Arc::new(NoisyTool));
        let mut agent = Agent::new(
            ScriptedClient::new(vec![
                tool_turn("noise incoming", r#"{"tool":"noisy","args":null}"#),
                plain_turn("done"),
            ]),
            router,
            Role::Default,
            "system",
            AgentConfig {
                response_char_budget: 100,
                ..AgentConfig::default()
            },
        );

        agent.prompt("make noise").await.expect("prompt");

        let tool_turn = agent
            .history()
            .iter()
            .find(|turn| turn.role == MessageRole::Tool)
            .expect("tool feedback turn");
        assert!(tool_turn
            .content
            .ends_with("[Output truncated, total length: 500]"));
    }

    #[tokio::test]
    async fn unit_provider_failures_propagate_as_agent_errors() {
        let mut agent = agent(vec![]);

        let error = agent.prompt("hello").await.expect_err("script exhausted");
        assert!(matches!(error, AgentError::Provider(_)));
    }

    #[tokio::test]
    async fn unit_streaming_handler_sees_the_assistant_text() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let handler: StreamDeltaHandler = Arc::new(move |delta: String| {
            sink.lock().expect("delta lock").push_str(&delta);
        });

        let mut agent = agent(vec![plain_turn("streamed reply")]);
        agent
            .prompt_with_output("hi", Some(handler))
            .await
            .expect("prompt");

        assert_eq!(seen.lock().expect("delta lock").as_str(), "streamed reply");
    }
}
