//! agentflow CLI
//!
//! Runs business agents and multi-agent workflows, and inspects
//! conversation memory. Results are printed to stdout as JSON; logs go to
//! stderr.
//!
//! Usage:
//!   agentflow agents list
//!   agentflow agent run customer_service --task "Customer complaint about late delivery"
//!   agentflow workflow run purchase_approval --task "3 laptops" --field amount=3600
//!   agentflow history customer_service --all
//!   agentflow conversation new customer_service
//!   agentflow memory store data_analyst preference report_format '"tables"'

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentflow_agent::config::{AgentFlowConfig, AgentOverride};
use agentflow_agent::db::{ConversationStatus, Database};
use agentflow_agent::llm::{backend_from_config, list_models, DEFAULT_OLLAMA_URL};
use agentflow_agent::{ConversationStore, FileAttachment, HistoryScope, NewMemory, TaskInput};
use orchestrator::agent_config::AgentRegistry;
use orchestrator::engine::{EngineConfig, WorkflowEngine};
use orchestrator::result::{ExecutionResult, ExecutionStatus};
use orchestrator::workflow::{shared_output_keys, WorkflowDefinition, WorkflowError};

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Business agents and multi-agent workflows backed by language models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model provider: mock, ollama or openai
    #[arg(long, env = "AGENTFLOW_PROVIDER", global = true)]
    provider: Option<String>,

    /// Run every agent on this model
    #[arg(short = 'm', long, env = "AGENTFLOW_MODEL", global = true)]
    model: Option<String>,

    /// Provider base URL
    #[arg(long, env = "AGENTFLOW_URL", global = true)]
    url: Option<String>,

    /// Conversation database file
    #[arg(long, env = "AGENTFLOW_DB", global = true)]
    db: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Agent catalogue
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Run a single agent
    Agent {
        #[command(subcommand)]
        command: AgentRunCommands,
    },
    /// Workflow management and execution
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Show an agent's conversation history
    History {
        agent: String,

        /// Include earlier conversations and separators
        #[arg(long)]
        all: bool,
    },
    /// Conversation management
    Conversation {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Long-term agent memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// List models served by the Ollama endpoint
    Models,
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List available agents
    List,
    /// Show agent configuration
    Show {
        /// Agent id
        agent: String,
    },
}

#[derive(Subcommand)]
enum AgentRunCommands {
    /// Execute one turn
    Run {
        /// Agent id (e.g., "customer_service")
        agent: String,

        #[command(flatten)]
        input: InputArgs,

        /// Start a fresh conversation before this turn
        #[arg(long)]
        new_conversation: bool,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run a workflow
    Run {
        /// Workflow id (e.g., "purchase_approval")
        workflow: String,

        #[command(flatten)]
        input: InputArgs,

        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// List available workflows
    List,
    /// Show workflow definition
    Show {
        /// Workflow id
        workflow: String,
    },
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// Start a new conversation for an agent
    New { agent: String },
    /// List an agent's conversations, newest first
    List {
        agent: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Mark a conversation as ended
    End {
        conversation_id: String,
        /// completed or failed
        #[arg(long, default_value = "completed")]
        status: ConversationStatus,
    },
    /// Search an agent's messages (case-insensitive)
    Search {
        agent: String,
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Delete ended conversations older than N days
    Cleanup {
        agent: String,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Store or update a memory
    Store {
        agent: String,
        /// fact, pattern, preference, insight, ...
        memory_type: String,
        key: String,
        /// Parsed as JSON when possible, otherwise kept as a string
        value: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// Recall unexpired memories, most confident first
    Recall {
        agent: String,
        #[arg(long = "type")]
        memory_type: Option<String>,
        /// Case-insensitive substring of the key
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Task description
    #[arg(long, short)]
    task: String,

    /// Extra input field as key=value (value parsed as JSON when possible)
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, Value)>,

    /// Attach a text file
    #[arg(long = "file")]
    files: Vec<PathBuf>,
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{raw}'"));
    }
    Ok((key.to_string(), parse_value(value)))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_attachment(path: &Path) -> Result<FileAttachment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_text_plain()
        .essence_str()
        .to_string();

    Ok(FileAttachment {
        name,
        mime_type,
        content,
    })
}

impl InputArgs {
    fn into_task_input(self) -> Result<TaskInput> {
        let mut input = TaskInput::from_task(self.task);
        for (key, value) in self.fields {
            input = input.with_field(key, value);
        }
        for path in &self.files {
            input = input.with_file(read_attachment(path)?);
        }
        Ok(input)
    }
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Everything a command needs, resolved from config and flags
struct AppContext {
    config: AgentFlowConfig,
    registry: AgentRegistry,
    db_path: Option<PathBuf>,
}

impl AppContext {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = AgentFlowConfig::load()?;

        if let Some(provider) = &cli.provider {
            config.llm.provider = provider.clone();
        }
        if let Some(url) = &cli.url {
            config.llm.url = Some(url.clone());
        }
        let registry = build_registry(
            config.llm.model.as_deref(),
            &config.agents,
            cli.model.as_deref(),
        );
        if let Some(model) = &cli.model {
            config.llm.model = Some(model.clone());
        }

        let db_path = cli.db.clone().or_else(|| config.store.resolved_path());

        Ok(Self {
            config,
            registry,
            db_path,
        })
    }

    fn store(&self) -> Result<ConversationStore> {
        let db = match &self.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::open()?,
        };
        Ok(ConversationStore::new(db))
    }

    fn engine(&self, workflows_dir: Option<PathBuf>) -> Result<WorkflowEngine> {
        let backend = backend_from_config(&self.config.llm)?;
        let mut engine_config = EngineConfig::from_config(&self.config);
        if workflows_dir.is_some() {
            engine_config.custom_workflows_dir = workflows_dir;
        }

        Ok(WorkflowEngine::new(
            self.registry.clone(),
            self.store()?,
            backend,
            engine_config,
        ))
    }
}

/// Catalogue with models applied, lowest precedence first: built-in
/// defaults, `[llm] model`, per-agent `[[agents]]` entries, then the
/// command-line model which rebinds every agent
fn build_registry(
    config_model: Option<&str>,
    overrides: &[AgentOverride],
    cli_model: Option<&str>,
) -> AgentRegistry {
    let mut registry = AgentRegistry::with_defaults();
    if let Some(model) = config_model {
        registry.set_all_models(model);
    }
    registry.apply_overrides(overrides);
    if let Some(model) = cli_model {
        registry.set_all_models(model);
    }
    registry
}

/// Workflow definition plus the output keys several tasks publish
fn workflow_details(workflow: &WorkflowDefinition) -> Result<Value> {
    let mut details = serde_json::to_value(workflow)?;
    let mut shared: Vec<_> = shared_output_keys(workflow).into_iter().collect();
    shared.sort_unstable();
    if let Value::Object(map) = &mut details {
        map.insert("shared_output_keys".to_string(), serde_json::json!(shared));
    }
    Ok(details)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn execution_exit(result: &ExecutionResult) -> Result<ExitCode> {
    println!("{}", result.to_json()?);
    Ok(match result.status {
        ExecutionStatus::Failed => ExitCode::from(1),
        ExecutionStatus::Completed | ExecutionStatus::Partial => ExitCode::SUCCESS,
    })
}

fn error_exit(err: &WorkflowError) -> ExitCode {
    let payload = serde_json::json!({
        "error": { "kind": err.kind(), "message": err.to_string() }
    });
    println!("{}", payload);
    if (400..500).contains(&err.http_status()) {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI first to get verbosity before initializing tracing
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if let Some(workflow_err) = e.downcast_ref::<WorkflowError>() {
                return error_exit(workflow_err);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = AppContext::load(&cli)?;

    match cli.command {
        Commands::Agents { command } => run_agents_command(command, &ctx.registry),
        Commands::Agent { command } => run_agent_command(command, &ctx).await,
        Commands::Workflow { command } => run_workflow_command(command, &ctx).await,
        Commands::History { agent, all } => {
            let scope = if all {
                HistoryScope::All
            } else {
                HistoryScope::CurrentOnly
            };
            let history = ctx.store()?.get_history(&agent, scope).await?;
            print_json(&history)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Conversation { command } => run_conversation_command(command, &ctx).await,
        Commands::Memory { command } => run_memory_command(command, &ctx).await,
        Commands::Models => {
            let url = ctx.config.llm.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
            let models = list_models(url).await?;
            for model in models {
                println!("{}", model.name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_agents_command(command: AgentCommands, registry: &AgentRegistry) -> Result<ExitCode> {
    match command {
        AgentCommands::List => {
            println!("Available Agents:\n");
            for (id, identity) in registry.iter() {
                println!(
                    "  {} ({}) - {}",
                    id, identity.model.model_name, identity.name
                );
            }
        }

        AgentCommands::Show { agent } => match registry.get(&agent) {
            Some(identity) => print_json(identity)?,
            None => return Ok(error_exit(&WorkflowError::UnknownAgent(agent))),
        },
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_agent_command(command: AgentRunCommands, ctx: &AppContext) -> Result<ExitCode> {
    match command {
        AgentRunCommands::Run {
            agent,
            input,
            new_conversation,
        } => {
            let engine = ctx.engine(None)?;
            if !engine.registry().contains(&agent) {
                return Ok(error_exit(&WorkflowError::UnknownAgent(agent)));
            }
            if new_conversation {
                engine.store().start_new_conversation(&agent).await?;
            }

            match engine.execute_agent(&agent, input.into_task_input()?).await {
                Ok(result) => execution_exit(&result),
                Err(e) => Ok(error_exit(&e)),
            }
        }
    }
}

async fn run_workflow_command(command: WorkflowCommands, ctx: &AppContext) -> Result<ExitCode> {
    match command {
        WorkflowCommands::Run {
            workflow,
            input,
            workflows_dir,
        } => {
            let engine = ctx.engine(workflows_dir)?;
            let input = input.into_task_input()?;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing the current group");
                    on_ctrl_c.cancel();
                }
            });

            match engine.run_with_cancel(&workflow, input, cancel).await {
                Ok(result) => execution_exit(&result),
                Err(e) => Ok(error_exit(&e)),
            }
        }

        WorkflowCommands::List => {
            let engine = ctx.engine(None)?;

            println!("Available Workflows:\n");
            for (workflow, is_custom) in engine.list_workflows() {
                let marker = if is_custom { " [custom]" } else { "" };
                println!("  {}{} - {}", workflow.id, marker, workflow.description);
            }

            println!(
                "\nRun a workflow with: agentflow workflow run <id> --task \"description\""
            );
            Ok(ExitCode::SUCCESS)
        }

        WorkflowCommands::Show { workflow } => {
            let engine = ctx.engine(None)?;
            match engine.get_workflow(&workflow) {
                Some(wf) => {
                    print_json(&workflow_details(wf)?)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(error_exit(&WorkflowError::NotFound(workflow))),
            }
        }
    }
}

async fn run_conversation_command(command: ConversationCommands, ctx: &AppContext) -> Result<ExitCode> {
    let store = ctx.store()?;

    match command {
        ConversationCommands::New { agent } => {
            let conversation_id = store.start_new_conversation(&agent).await?;
            print_json(&serde_json::json!({ "agent_id": agent, "conversation_id": conversation_id }))?;
        }
        ConversationCommands::List { agent, limit } => {
            print_json(&store.list_conversations(&agent, limit).await?)?;
        }
        ConversationCommands::End {
            conversation_id,
            status,
        } => {
            if !store.end_conversation(&conversation_id, status).await? {
                eprintln!("Conversation '{}' not found.", conversation_id);
                return Ok(ExitCode::from(2));
            }
        }
        ConversationCommands::Search {
            agent,
            query,
            limit,
        } => {
            print_json(&store.search(&agent, &query, limit).await?)?;
        }
        ConversationCommands::Cleanup { agent, days } => {
            let report = store.cleanup_older_than(&agent, days).await?;
            print_json(&serde_json::json!({
                "agent_id": agent,
                "conversations_deleted": report.conversations_deleted,
                "memories_deleted": report.memories_deleted,
            }))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_memory_command(command: MemoryCommands, ctx: &AppContext) -> Result<ExitCode> {
    let store = ctx.store()?;

    match command {
        MemoryCommands::Store {
            agent,
            memory_type,
            key,
            value,
            confidence,
            expires_in_days,
        } => {
            if !ctx.registry.contains(&agent) {
                return Ok(error_exit(&WorkflowError::UnknownAgent(agent)));
            }
            let mut entry =
                NewMemory::new(memory_type, key, parse_value(&value)).with_confidence(confidence);
            if let Some(days) = expires_in_days {
                entry = entry.expires_in_days(days);
            }
            print_json(&store.store_memory(&agent, entry).await?)?;
        }
        MemoryCommands::Recall {
            agent,
            memory_type,
            key,
        } => {
            let memories = store
                .recall_memory(&agent, memory_type.as_deref(), key.as_deref())
                .await?;
            print_json(&memories)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
