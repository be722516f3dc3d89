use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use jsonschema::validator_for;
use serde_json::{json, Value};
use tracing::info;
use warden_ai::ToolInvocation;

/// Which tool table a conversation runs against. Admin sees a strict
/// superset of the default table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Default,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Default => "default",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Role::Default),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}': expected default|admin")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Renders the payload for re-insertion into the conversation: string
    /// content passes through, everything else becomes compact JSON.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> ToolOutcome;
}

struct RegisteredTool {
    name: String,
    admin_only: bool,
    tool: Arc<dyn AgentTool>,
}

/// The dispatch gate between model-authored tool requests and tool bodies.
///
/// Every failure is a JSON error payload handed back into the conversation,
/// never a panic or an `Err` across this boundary.
#[derive(Default)]
pub struct ToolRouter {
    tools: Vec<RegisteredTool>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool visible to both roles.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.insert(tool, false);
    }

    /// Registers a tool visible to the admin role only.
    pub fn register_admin(&mut self, tool: Arc<dyn AgentTool>) {
        self.insert(tool, true);
    }

    fn insert(&mut self, tool: Arc<dyn AgentTool>, admin_only: bool) {
        let name = tool.definition().name;
        self.tools.retain(|registered| registered.name != name);
        self.tools.push(RegisteredTool {
            name,
            admin_only,
            tool,
        });
    }

    /// Tool definitions visible to `role`, for prompt assembly.
    pub fn visible_definitions(&self, role: Role) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|registered| !registered.admin_only || role == Role::Admin)
            .map(|registered| registered.tool.definition())
            .collect()
    }

    fn lookup(&self, role: Role, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.iter().find_map(|registered| {
            if registered.name != name {
                return None;
            }
            if registered.admin_only && role != Role::Admin {
                return None;
            }
            Some(&registered.tool)
        })
    }

    /// Request shape per the wire contract: a JSON object with exactly the
    /// keys `tool` (a string naming a tool in the role's table) and `args`.
    fn is_valid_request(&self, role: Role, payload: &Value) -> bool {
        let Some(map) = payload.as_object() else {
            return false;
        };
        if map.len() != 2 || !map.contains_key("tool") || !map.contains_key("args") {
            return false;
        }
        let Some(name) = map.get("tool").and_then(Value::as_str) else {
            return false;
        };
        self.lookup(role, name).is_some()
    }

    /// Routes one tool request and returns the JSON-encoded result. Order:
    /// shape and role-table check, audit log, table lookup, argument schema
    /// check, tool body.
    pub async fn dispatch(&self, role: Role, payload: &Value) -> String {
        if !self.is_valid_request(role, payload) {
            return json!({"error": "Invalid request format or unauthorized tool access."})
                .to_string();
        }

        let invocation: ToolInvocation = match serde_json::from_value(payload.clone()) {
            Ok(invocation) => invocation,
            Err(_) => {
                return json!({"error": "Invalid request format or unauthorized tool access."})
                    .to_string()
            }
        };

        // `args: null` means a no-argument call.
        let arguments = invocation.args.unwrap_or_else(|| json!({}));

        info!(
            target: "tool_audit",
            tool = %invocation.tool,
            args = %arguments,
            role = role.as_str(),
            "tool invocation"
        );

        let Some(tool) = self.lookup(role, &invocation.tool) else {
            return json!({"error": "Unauthorized tool access"}).to_string();
        };

        let definition = tool.definition();
        if let Err(message) = validate_tool_arguments(&definition, &arguments) {
            return json!({"error": message}).to_string();
        }

        tool.execute(arguments).await.as_text()
    }
}

fn validate_tool_arguments(definition: &ToolDefinition, arguments: &Value) -> Result<(), String> {
    let validator = validator_for(&definition.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", definition.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!(
            "invalid arguments for '{}': {}",
            definition.name, first
        ));
    }

    Ok(())
}
