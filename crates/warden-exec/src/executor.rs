use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use tokio::{io::AsyncWriteExt, time::timeout};
use tracing::{debug, warn};
use warden_policy::ExecPolicy;

/// Environment variables forwarded into spawned commands; everything else is
/// cleared before the child starts.
const SAFE_COMMAND_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "LC_CTYPE", "TERM", "TMPDIR", "TMP", "TEMP",
    "TZ",
];

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// One command execution request. Built per tool call, discarded after the
/// report is produced.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub responses: Vec<String>,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            responses: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn with_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one execution attempt; immutable once returned.
///
/// Engine failures (validation, missing working directory, spawn error,
/// timeout) are reports with `exit_code` -1 and the reason in `stderr`. A
/// non-zero child exit is not an engine failure and is reported faithfully.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecutionReport {
    pub fn rejection(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: -1,
        }
    }

    pub fn from_exit(code: Option<i32>, stdout: String, stderr: String) -> Self {
        let exit_code = code.map(i64::from).unwrap_or(-1);
        Self {
            success: exit_code == 0,
            stdout,
            stderr,
            exit_code,
        }
    }
}

/// Policy-gated blocking executor: re-validates every request, spawns one
/// shell-interpreted child, and waits for it under a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    policy: Arc<ExecPolicy>,
}

impl CommandRunner {
    pub fn new(policy: Arc<ExecPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Arc<ExecPolicy> {
        &self.policy
    }

    /// Runs a request to completion. Always returns a well-formed report;
    /// nothing on this path may panic across the tool boundary.
    pub async fn execute(&self, request: &CommandRequest) -> ExecutionReport {
        let validation = self.policy.validate_command(&request.command);
        if !validation.valid {
            return ExecutionReport::rejection(validation.reason_text());
        }

        if let Some(working_dir) = &request.working_dir {
            if !working_dir.is_dir() {
                return ExecutionReport::rejection(format!(
                    "Working directory does not exist: {}",
                    working_dir.display()
                ));
            }

            let validation = self.policy.validate_path(&working_dir.to_string_lossy());
            if !validation.valid {
                return ExecutionReport::rejection(validation.reason_text());
            }
        }

        let mut builder = tokio::process::Command::from(shell_command(
            &request.command,
            request.working_dir.as_deref(),
        ));
        builder.kill_on_drop(true);
        builder.stdout(Stdio::piped());
        builder.stderr(Stdio::piped());
        builder.stdin(if request.responses.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });

        let mut child = match builder.spawn() {
            Ok(child) => child,
            Err(error) => return ExecutionReport::rejection(error.to_string()),
        };
        debug!(command = %request.command, "spawned command");

        if !request.responses.is_empty() {
            // One joint write; dropping the handle closes the pipe so the
            // child sees EOF after the scripted input.
            let input = format!("{}\n", request.responses.join("\n"));
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(error) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %error, "failed to write interactive responses");
                }
            }
        }

        match timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecutionReport::from_exit(
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ),
            Ok(Err(error)) => ExecutionReport::rejection(error.to_string()),
            Err(_) => {
                // The elapsed timeout drops the wait future, and with it the
                // kill_on_drop child handle.
                warn!(command = %request.command, "Command execution timed out");
                ExecutionReport::rejection("Command execution timed out")
            }
        }
    }
}

/// Builds the shared shell-interpreted spawn: `$SHELL -lc <command>` with a
/// cleared environment apart from the safe allowlist. Validation has already
/// happened by the time a command reaches this.
pub(crate) fn shell_command(command: &str, working_dir: Option<&Path>) -> std::process::Command {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
    let mut builder = std::process::Command::new(shell);
    builder.arg("-lc").arg(command);
    builder.env_clear();
    for key in SAFE_COMMAND_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            builder.env(key, value);
        }
    }
    if let Some(working_dir) = working_dir {
        builder.current_dir(working_dir);
    }
    builder
}
