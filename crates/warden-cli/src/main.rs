//! Warden binary: resolves the policy profile and role, registers tools,
//! and drives the conversation loop over stdin.

use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_agent::{Agent, AgentConfig, Role, ToolRouter};
use warden_ai::{
    OpenAiCompatibleClient, OpenAiConfig, StreamDeltaHandler, TOOL_END_MARKER, TOOL_START_MARKER,
};
use warden_policy::{profile_name, ExecPolicy, PolicyProfile};
use warden_tools::{CalculateTool, CommandTool, FileReadTool, FileWriteTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliRole {
    Default,
    Admin,
}

impl From<CliRole> for Role {
    fn from(value: CliRole) -> Self {
        match value {
            CliRole::Default => Role::Default,
            CliRole::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliProfile {
    Auto,
    Containerized,
    Host,
}

#[derive(Debug, Parser)]
#[command(name = "warden", about = "Policy-gated tool-using agent", version)]
struct Cli {
    #[arg(
        long,
        value_enum,
        default_value_t = CliRole::Default,
        help = "Role whose tool table the conversation uses"
    )]
    role: CliRole,

    #[arg(
        long,
        value_enum,
        default_value_t = CliProfile::Auto,
        help = "Execution policy profile; auto picks containerized when a container marker is present"
    )]
    profile: CliProfile,

    #[arg(
        long,
        help = "Directory permitted under the host profile (defaults to the current directory)"
    )]
    project_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "WARDEN_API_BASE",
        default_value = "http://127.0.0.1:1234/v1",
        help = "Base URL of the OpenAI-compatible endpoint"
    )]
    api_base: String,

    #[arg(
        long,
        env = "WARDEN_API_KEY",
        hide_env_values = true,
        default_value = "lm-studio",
        help = "API key for the endpoint"
    )]
    api_key: String,

    #[arg(
        long,
        env = "WARDEN_MODEL",
        default_value = "qwen2.5-7b-instruct-1m",
        help = "Model identifier"
    )]
    model: String,

    #[arg(long, default_value_t = 120, help = "Provider request timeout in seconds")]
    timeout_seconds: u64,

    #[arg(
        long,
        default_value_t = 4000,
        help = "Character budget for tool output fed back to the model"
    )]
    max_output_chars: usize,

    #[arg(
        long,
        default_value_t = 4,
        help = "Tool-carrying model turns allowed per prompt"
    )]
    max_tool_iterations: usize,

    #[arg(help = "One-shot prompt; without it an interactive session starts")]
    prompt: Option<String>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,tool_audit=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn container_marker_present() -> bool {
    std::path::Path::new("/.dockerenv").exists() || std::env::var_os("container").is_some()
}

fn resolve_profile(choice: CliProfile, containerized: bool) -> PolicyProfile {
    match choice {
        CliProfile::Containerized => PolicyProfile::Containerized,
        CliProfile::Host => PolicyProfile::Host,
        CliProfile::Auto => {
            if containerized {
                PolicyProfile::Containerized
            } else {
                PolicyProfile::Host
            }
        }
    }
}

fn build_router(policy: &Arc<ExecPolicy>) -> ToolRouter {
    let mut router = ToolRouter::new();
    router.register(Arc::new(CalculateTool));
    router.register_admin(Arc::new(CommandTool::new(policy.clone())));
    router.register_admin(Arc::new(FileReadTool::new(policy.clone())));
    router.register_admin(Arc::new(FileWriteTool::new(policy.clone())));
    router
}

fn build_system_prompt(router: &ToolRouter, role: Role) -> String {
    let mut prompt = format!(
        "You are Warden, an assistant with access to local tools.\n\
         To use a tool, finish your message with exactly one block of the form\n\
         {TOOL_START_MARKER} {{\"tool\": \"<name>\", \"args\": <arguments>}} {TOOL_END_MARKER}\n\
         The result arrives as the next tool message. Answer directly when no\n\
         tool is needed.\n\nAvailable tools:\n"
    );
    for definition in router.visible_definitions(role) {
        let schema = serde_json::to_string(&definition.parameters).unwrap_or_default();
        prompt.push_str(&format!(
            "- {}: {} (args schema: {})\n",
            definition.name, definition.description, schema
        ));
    }
    prompt
}

async fn run_interactive(mut agent: Agent, on_delta: StreamDeltaHandler) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("You: ");
        std::io::stdout()
            .flush()
            .context("failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
            break;
        }

        match agent
            .prompt_with_output(trimmed, Some(on_delta.clone()))
            .await
        {
            Ok(_) => println!(),
            Err(error) => eprintln!("error: {error}"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let profile = resolve_profile(cli.profile, container_marker_present());
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let policy = Arc::new(
        ExecPolicy::for_profile(profile, &project_dir)
            .context("failed to construct execution policy")?,
    );

    let role = Role::from(cli.role);
    info!(
        profile = profile_name(profile),
        role = role.as_str(),
        "starting warden"
    );

    let client = OpenAiCompatibleClient::new(OpenAiConfig {
        api_base: cli.api_base.clone(),
        api_key: cli.api_key.clone(),
        model: cli.model.clone(),
        max_tokens: None,
        temperature: None,
        request_timeout_ms: cli.timeout_seconds.saturating_mul(1000),
        max_retries: 2,
    })
    .context("failed to create provider client")?;

    let router = build_router(&policy);
    let system_prompt = build_system_prompt(&router, role);
    let mut agent = Agent::new(
        Arc::new(client),
        router,
        role,
        system_prompt,
        AgentConfig {
            max_tool_iterations: cli.max_tool_iterations,
            response_char_budget: cli.max_output_chars,
        },
    );

    let on_delta: StreamDeltaHandler = Arc::new(|delta: String| {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    });

    if let Some(prompt) = &cli.prompt {
        agent
            .prompt_with_output(prompt, Some(on_delta))
            .await
            .context("conversation turn failed")?;
        println!();
        return Ok(());
    }

    run_interactive(agent, on_delta).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::CommandFactory;
    use tempfile::tempdir;
    use warden_agent::Role;
    use warden_policy::{ExecPolicy, PolicyProfile};

    use super::{build_router, build_system_prompt, resolve_profile, Cli, CliProfile};

    #[test]
    fn unit_cli_declaration_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unit_profile_resolution_prefers_the_explicit_choice() {
        assert_eq!(
            resolve_profile(CliProfile::Containerized, false),
            PolicyProfile::Containerized
        );
        assert_eq!(resolve_profile(CliProfile::Host, true), PolicyProfile::Host);
        assert_eq!(
            resolve_profile(CliProfile::Auto, true),
            PolicyProfile::Containerized
        );
        assert_eq!(resolve_profile(CliProfile::Auto, false), PolicyProfile::Host);
    }

    #[test]
    fn functional_system_prompt_lists_only_the_visible_tools() {
        let temp = tempdir().expect("tempdir");
        let policy = Arc::new(ExecPolicy::host(temp.path()).expect("policy"));
        let router = build_router(&policy);

        let default_prompt = build_system_prompt(&router, Role::Default);
        assert!(default_prompt.contains("- calculate:"));
        assert!(!default_prompt.contains("- command:"));

        let admin_prompt = build_system_prompt(&router, Role::Admin);
        assert!(admin_prompt.contains("- calculate:"));
        assert!(admin_prompt.contains("- command:"));
        assert!(admin_prompt.contains("- read_file:"));
        assert!(admin_prompt.contains("- write_file:"));
        assert!(admin_prompt.contains("[[tool]]"));
    }
}
