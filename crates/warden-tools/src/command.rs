use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_agent::{AgentTool, ToolDefinition, ToolOutcome};
use warden_exec::{CommandRequest, CommandRunner};
use warden_policy::ExecPolicy;

/// Runs one shell command through the policy-gated executor and reports the
/// full execution outcome as JSON.
pub struct CommandTool {
    runner: CommandRunner,
}

impl CommandTool {
    pub fn new(policy: Arc<ExecPolicy>) -> Self {
        Self {
            runner: CommandRunner::new(policy),
        }
    }
}

#[async_trait]
impl AgentTool for CommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "command".to_string(),
            description: "Execute a shell command under the active execution policy".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command line to run" },
                    "working_dir": { "type": "string" },
                    "responses": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Lines fed to the command's stdin"
                    },
                    "timeout_seconds": { "type": "number", "minimum": 1 }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        if !arguments.is_object() {
            return ToolOutcome::error(json!({ "error": "Invalid arguments" }));
        }

        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if command.is_empty() {
            return ToolOutcome::error(json!({ "error": "No command provided" }));
        }

        let working_dir = match crate::arguments::optional_string(&arguments, "working_dir") {
            Ok(working_dir) => working_dir,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };
        let responses = match crate::arguments::optional_string_array(&arguments, "responses") {
            Ok(responses) => responses,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };
        let timeout_seconds = match crate::arguments::optional_seconds(&arguments, "timeout_seconds")
        {
            Ok(timeout_seconds) => timeout_seconds,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };

        let mut request = CommandRequest::new(command);
        if let Some(working_dir) = working_dir {
            request = request.with_working_dir(working_dir);
        }
        if !responses.is_empty() {
            request = request.with_responses(responses);
        }
        if let Some(seconds) = timeout_seconds {
            request = request.with_timeout(Duration::from_secs_f64(seconds));
        }

        let report = self.runner.execute(&request).await;
        let payload = json!({
            "success": report.success,
            "stdout": report.stdout,
            "stderr": report.stderr,
            "exit_code": report.exit_code,
        });
        if report.success {
            ToolOutcome::ok(payload)
        } else {
            ToolOutcome::error(payload)
        }
    }
}
