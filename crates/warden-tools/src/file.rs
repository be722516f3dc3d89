use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_agent::{AgentTool, ToolDefinition, ToolOutcome};
use warden_policy::ExecPolicy;

use crate::arguments::required_string;

/// Reads a UTF-8 text file after the path clears the policy's allowed roots.
pub struct FileReadTool {
    policy: Arc<ExecPolicy>,
}

impl FileReadTool {
    pub fn new(policy: Arc<ExecPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl AgentTool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file from an allowed directory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to read" }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let path = match required_string(&arguments, "path") {
            Ok(path) => path,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };

        let validation = self.policy.validate_path(&path);
        if !validation.valid {
            return ToolOutcome::error(json!({
                "path": path,
                "error": validation.reason_text(),
            }));
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolOutcome::ok(json!({ "path": path, "content": content })),
            Err(error) => ToolOutcome::error(json!({
                "path": path,
                "error": error.to_string(),
            })),
        }
    }
}

/// Writes UTF-8 text inside the policy's allowed roots, creating parent
/// directories as needed.
pub struct FileWriteTool {
    policy: Arc<ExecPolicy>,
}

impl FileWriteTool {
    pub fn new(policy: Arc<ExecPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl AgentTool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write UTF-8 text to a file in an allowed directory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let path = match required_string(&arguments, "path") {
            Ok(path) => path,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };
        let content = match required_string(&arguments, "content") {
            Ok(content) => content,
            Err(error) => return ToolOutcome::error(json!({ "error": error })),
        };

        let validation = self.policy.validate_path(&path);
        if !validation.valid {
            return ToolOutcome::error(json!({
                "path": path,
                "error": validation.reason_text(),
            }));
        }

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(error) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutcome::error(json!({
                        "path": path,
                        "error": format!("failed to create parent directory: {error}"),
                    }));
                }
            }
        }

        match tokio::fs::write(&path, content.as_bytes()).await {
            Ok(()) => ToolOutcome::ok(json!({
                "path": path,
                "bytes_written": content.len(),
            })),
            Err(error) => ToolOutcome::error(json!({
                "path": path,
                "error": error.to_string(),
            })),
        }
    }
}
