//! Cross-crate scenarios: a scripted model drives the agent loop, the
//! dispatch gate, and the policy-gated executor end to end.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::Mutex as AsyncMutex;
use warden_agent::{Agent, AgentConfig, Role, ToolRouter};
use warden_ai::{
    ChatRequest, Message, MessageRole, ModelClient, ModelTurn, ProviderError, StreamDeltaHandler,
    TOOL_END_MARKER,
};
use warden_policy::ExecPolicy;
use warden_tools::{CalculateTool, CommandTool, FileReadTool, FileWriteTool};

struct ScriptedClient {
    turns: AsyncMutex<VecDeque<ModelTurn>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: AsyncMutex::new(turns.into()),
            requests: AsyncMutex::new(Vec::new()),
        })
    }

    async fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
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
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ModelTurn, ProviderError> {
        self.requests.lock().await.push(request);
        let turn = self.turns.lock().await.pop_front().ok_or_else(|| {
            ProviderError::InvalidResponse("scripted turn queue exhausted".to_string())
        })?;
        if let Some(handler) = on_delta {
            handler(turn.text.clone());
        }
        Ok(turn)
    }
}

fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: text.to_string(),
        tool_payload: None,
    }
}

fn tool_turn(text: &str, payload: String) -> ModelTurn {
    ModelTurn {
        text: text.to_string(),
        tool_payload: Some(payload),
    }
}

fn full_router(policy: &Arc<ExecPolicy>) -> ToolRouter {
    let mut router = ToolRouter::new();
    router.register(Arc::new(CalculateTool));
    router.register_admin(Arc::new(CommandTool::new(policy.clone())));
    router.register_admin(Arc::new(FileReadTool::new(policy.clone())));
    router.register_admin(Arc::new(FileWriteTool::new(policy.clone())));
    router
}

fn agent_for(client: Arc<ScriptedClient>, policy: &Arc<ExecPolicy>, role: Role) -> Agent {
    Agent::new(
        client,
        full_router(policy),
        role,
        "Tools are invoked with the tagged block convention.",
        AgentConfig::default(),
    )
}

fn tool_messages(agent: &Agent) -> Vec<String> {
    agent
        .history()
        .iter()
        .filter(|turn| turn.role == MessageRole::Tool)
        .map(|turn| turn.content.clone())
        .collect()
}

#[tokio::test]
async fn functional_admin_command_runs_and_the_report_reenters_history() {
    let temp = tempdir().expect("tempdir");
    std::fs::write(temp.path().join("present.txt"), "x").expect("fixture");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({
        "tool": "command",
        "args": {
            "command": "ls -la",
            "working_dir": temp.path().to_string_lossy(),
        }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Listing the directory now.", payload),
        text_turn("All done."),
    ]);
    let mut agent = agent_for(client.clone(), &policy, Role::Admin);

    let answer = agent.prompt("what is in the project?").await.expect("prompt");

    assert_eq!(answer, "All done.");
    let tool_messages = tool_messages(&agent);
    assert_eq!(tool_messages.len(), 1);
    assert!(tool_messages[0].starts_with("Tool result: "));
    assert!(tool_messages[0].contains("\"success\":true"));
    assert!(tool_messages[0].contains("\"exit_code\":0"));
    assert!(tool_messages[0].contains("present.txt"));

    let requests = client.recorded_requests().await;
    assert_eq!(requests.len(), 2);
    let roles: Vec<MessageRole> = requests[1]
        .messages
        .iter()
        .map(|message| message.role)
        .collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool
        ]
    );
}

#[tokio::test]
async fn functional_default_role_is_blocked_before_the_validator_runs() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({
        "tool": "command",
        "args": {
            "command": "touch marker",
            "working_dir": temp.path().to_string_lossy(),
        }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Creating the marker.", payload),
        text_turn("I was not allowed to do that."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Default);

    agent.prompt("touch a file").await.expect("prompt");

    let tool_messages = tool_messages(&agent);
    assert_eq!(
        tool_messages[0],
        "Tool result: {\"error\":\"Invalid request format or unauthorized tool access.\"}"
    );
    assert!(!temp.path().join("marker").exists());
}

#[tokio::test]
async fn functional_calculate_serves_the_default_role() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({ "tool": "calculate", "args": "3+5*2" }).to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Working it out.", payload),
        text_turn("The answer is 13."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Default);

    let answer = agent.prompt("what is 3+5*2?").await.expect("prompt");

    assert_eq!(answer, "The answer is 13.");
    assert_eq!(tool_messages(&agent)[0], "Tool result: {\"result\":13}");
}

#[tokio::test]
async fn functional_file_tools_roundtrip_through_the_gate() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));
    let report_path = temp.path().join("report.txt");
    let report_path = report_path.to_string_lossy().to_string();

    let write_payload = json!({
        "tool": "write_file",
        "args": { "path": report_path, "content": "42\n" }
    })
    .to_string();
    let read_payload = json!({
        "tool": "read_file",
        "args": { "path": report_path }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Writing the report.", write_payload),
        tool_turn("Reading it back.", read_payload),
        text_turn("The report says 42."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Admin);

    let answer = agent.prompt("persist the answer").await.expect("prompt");

    assert_eq!(answer, "The report says 42.");
    let tool_messages = tool_messages(&agent);
    assert_eq!(tool_messages.len(), 2);
    assert!(tool_messages[0].contains("\"bytes_written\":3"));
    assert!(tool_messages[1].contains(r#""content":"42\n""#));
    assert_eq!(
        std::fs::read_to_string(temp.path().join("report.txt")).expect("written file"),
        "42\n"
    );
}

#[tokio::test]
async fn functional_interactive_responses_reach_the_child_process() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({
        "tool": "command",
        "args": { "command": "cat", "responses": ["first", "second"] }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Echoing the script.", payload),
        text_turn("Done."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Admin);

    agent.prompt("run cat with input").await.expect("prompt");

    assert!(tool_messages(&agent)[0].contains(r#""stdout":"first\nsecond\n""#));
}

#[tokio::test]
async fn regression_malformed_tool_json_is_fed_back_instead_of_crashing() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let client = ScriptedClient::new(vec![
        tool_turn("Calling a tool.", "{\"tool\": \"calculate\", \"args\": ".to_string()),
        text_turn("Let me try that again."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Default);

    let answer = agent.prompt("compute something").await.expect("prompt");

    assert_eq!(answer, "Let me try that again.");
    assert!(tool_messages(&agent)[0].starts_with("Tool result: Error: "));
}

#[tokio::test]
async fn regression_schema_violations_never_reach_the_tool_body() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({
        "tool": "command",
        "args": { "command": 42 }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Running it.", payload),
        text_turn("The arguments were wrong."),
    ]);
    let mut agent = agent_for(client, &policy, Role::Admin);

    agent.prompt("run something odd").await.expect("prompt");

    assert!(tool_messages(&agent)[0].contains("invalid arguments for 'command'"));
}

#[tokio::test]
async fn functional_long_command_output_is_truncated_by_the_budget() {
    let temp = tempdir().expect("tempdir");
    let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));

    let payload = json!({
        "tool": "command",
        "args": { "command": format!("echo {}", "a".repeat(300)) }
    })
    .to_string();
    let client = ScriptedClient::new(vec![
        tool_turn("Producing noise.", payload),
        text_turn("That was loud."),
    ]);
    let mut agent = Agent::new(
        client,
        full_router(&policy),
        Role::Admin,
        "Tools are invoked with the tagged block convention.",
        AgentConfig {
            response_char_budget: 120,
            ..AgentConfig::default()
        },
    );

    agent.prompt("make output").await.expect("prompt");

    let message = &tool_messages(&agent)[0];
    assert!(message.contains("\n[Output truncated, total length: "));
    let budgeted_length = "Tool result: ".len() + 120;
    assert!(message.lines().next().expect("first line").len() <= budgeted_length);
}
