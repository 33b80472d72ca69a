mod config;
mod health;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use config::{HandoffConfig, CONFIG_FILE};
use handoff_backlog::LedgerStore;
use handoff_core::WorkItem;
use handoff_orchestrator::{
    default_registry, Backlog, CostTier, Decomposer, Executor, ExecutorRegistry, Handoff,
    HandoffStep, Orchestrator,
};
use handoff_session::{FileStateStore, GitHistory, ResetOutcome, StateStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const EXIT_OPERATIONAL: u8 = 3;

#[derive(Parser)]
#[command(
    name = "handoff",
    version,
    about = "Handoff: route backlog work to the right executor"
)]
struct Cli {
    /// Path to config file (default: handoff.toml in the workspace)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root (overrides config)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a work item from the ranked backlog and hand out its first subtask
    Select {
        /// Backlog index to select (0 continues the active item); prompts when omitted
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// Infer progress from history and hand out the next subtask
    Next,
    /// Mark a subtask complete and hand out the next one
    Done {
        /// Subtask id, as shown in the instructions
        subtask_id: String,
    },
    /// Show the active work item and its subtask progress
    Status,
    /// Discard the orchestration state (a corrupt file is moved aside)
    Reset,
    /// Run the configured health check
    Health,
    /// Manage the executor registry
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List configured executors
    List,
    /// Enable an executor
    Enable { id: String },
    /// Disable an executor
    Disable { id: String },
    /// Register a new executor
    Add {
        /// Unique executor id
        id: String,
        /// Name shown in instructions (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,
        /// Cost tier: free, low, medium or high
        #[arg(short, long, default_value = "low")]
        tier: CostTier,
        /// Capability tag; repeat or separate with commas
        #[arg(short = 'C', long = "capability", value_delimiter = ',')]
        capabilities: Vec<String>,
        /// What the executor is good at
        #[arg(short, long)]
        description: Option<String>,
        /// Register it disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove an executor (the configured fallback cannot be removed)
    Remove { id: String },
    /// Print the registry as TOML, or write it to a file
    Export {
        /// Destination file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the built-in registry to the registry file
    Init {
        /// Overwrite an existing registry file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Usage errors share the operational exit code; 1 and 2 belong to health.
            let _ = e.print();
            return ExitCode::from(EXIT_OPERATIONAL);
        }
    };
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_OPERATIONAL)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<HandoffConfig> {
    let (path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => {
            let root = cli.workspace.clone().unwrap_or_else(|| PathBuf::from("."));
            (root.join(CONFIG_FILE), false)
        }
    };
    let mut config = HandoffConfig::load(&path, required).await?;
    if let Some(root) = &cli.workspace {
        config.workspace_root = root.clone();
    }
    debug!(
        workspace = %config.workspace_root.display(),
        state = %config.state_file().display(),
        registry = %config.registry_file().display(),
        "Configuration resolved"
    );
    Ok(config)
}

async fn build_orchestrator(config: HandoffConfig) -> anyhow::Result<Orchestrator> {
    let registry = ExecutorRegistry::load(&config.registry_file()).await?;
    let root = config.workspace_root.clone();
    let orchestrator = Orchestrator::new(
        LedgerStore::new(&root),
        Box::new(FileStateStore::new(config.state_file())),
        Box::new(GitHistory::new(&root, config.history.depth)),
        registry,
    )
    .with_decomposer(Decomposer::new(config.patterns))
    .with_fallback(config.fallback_executor);
    Ok(orchestrator)
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = load_config(&cli).await?;

    match cli.command {
        Commands::Select { index } => {
            let orchestrator = build_orchestrator(config).await?;
            let index = match index {
                Some(index) => index,
                None => {
                    let backlog = orchestrator.backlog().await?;
                    print_backlog(&backlog);
                    if backlog.ranked().is_empty() {
                        return Ok(0);
                    }
                    match prompt_index().await? {
                        Some(index) => index,
                        None => return Ok(0),
                    }
                }
            };
            print_handoff(&orchestrator.select(index).await?);
        }
        Commands::Next => {
            let orchestrator = build_orchestrator(config).await?;
            print_handoff(&orchestrator.next().await?);
        }
        Commands::Done { subtask_id } => {
            let orchestrator = build_orchestrator(config).await?;
            print_handoff(&orchestrator.done(&subtask_id).await?);
        }
        Commands::Status => {
            let orchestrator = build_orchestrator(config).await?;
            print!("{}", orchestrator.status().await?);
        }
        Commands::Reset => {
            let store = FileStateStore::new(config.state_file());
            match store.reset().await? {
                ResetOutcome::Absent => println!("No state to reset."),
                ResetOutcome::Removed => println!("State cleared: {}", store.path().display()),
                ResetOutcome::MovedAside(path) => {
                    println!("Corrupt state moved aside to {}", path.display());
                }
            }
        }
        Commands::Health => {
            let outcome = health::run(&config.health, &config.workspace_root).await?;
            match &outcome {
                health::HealthOutcome::Report(report) => print!("{report}"),
                health::HealthOutcome::Raw { output, .. } => print!("{output}"),
            }
            return Ok(outcome.exit_code());
        }
        Commands::Agents { action } => agents(action, &config).await?,
    }

    Ok(0)
}

async fn agents(action: AgentsAction, config: &HandoffConfig) -> anyhow::Result<()> {
    let path = &config.registry_file();
    match action {
        AgentsAction::List => {
            let registry = ExecutorRegistry::load(path).await?;
            println!("Executors ({}):", registry.len());
            for executor in registry.executors() {
                let state = if executor.enabled { "enabled" } else { "disabled" };
                println!(
                    "  {} ({}) [{}, {} cost]",
                    executor.id, executor.display_name, state, executor.cost_tier
                );
                println!("    capabilities: {}", executor.capabilities.join(", "));
                if let Some(notes) = &executor.notes {
                    println!("    note: {notes}");
                }
            }
        }
        AgentsAction::Enable { id } => set_enabled(path, &id, true).await?,
        AgentsAction::Disable { id } => set_enabled(path, &id, false).await?,
        AgentsAction::Init { force } => {
            if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
                anyhow::bail!(
                    "Registry {} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            default_registry().save(path).await?;
            println!("Wrote built-in registry to {}", path.display());
        }
        AgentsAction::Add {
            id,
            name,
            tier,
            capabilities,
            description,
            disabled,
        } => {
            let mut registry = ExecutorRegistry::load(path).await?;
            let mut executor = Executor::new(id.trim(), name.unwrap_or_else(|| id.clone()));
            executor.cost_tier = tier;
            executor.capabilities = capabilities;
            executor.description = description;
            executor.enabled = !disabled;
            registry.add(executor)?;
            registry.save(path).await?;
            info!(executor = %id.trim(), "Executor added");
            println!("Added {} to {}", id.trim(), path.display());
        }
        AgentsAction::Remove { id } => {
            if config.fallback_executor.as_deref() == Some(id.as_str()) {
                anyhow::bail!(
                    "'{id}' is the configured fallback_executor; change handoff.toml before removing it"
                );
            }
            let mut registry = ExecutorRegistry::load(path).await?;
            let removed = registry.remove(&id)?;
            registry.save(path).await?;
            info!(executor = %removed.id, "Executor removed");
            println!("Removed {} ({}) from {}", removed.id, removed.display_name, path.display());
        }
        AgentsAction::Export { output } => {
            let registry = ExecutorRegistry::load(path).await?;
            match output {
                Some(dest) => {
                    registry.save(&dest).await?;
                    println!("Exported {} executors to {}", registry.len(), dest.display());
                }
                None => print!("{}", registry.to_toml_string()?),
            }
        }
    }
    Ok(())
}

async fn set_enabled(path: &Path, id: &str, enabled: bool) -> anyhow::Result<()> {
    let mut registry = ExecutorRegistry::load(path).await?;
    registry.set_enabled(id, enabled)?;
    registry.save(path).await?;
    info!(executor = %id, enabled, "Registry updated");
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{verb} {id} in {}", path.display());
    if let Some(executor) = registry.get(id).filter(|e| enabled && e.requires_credential) {
        println!("Note: {} needs a credential before it can do any work.", executor.display_name);
    }
    Ok(())
}

fn describe(item: &WorkItem) -> String {
    let estimate = item
        .estimated_minutes
        .map_or_else(|| "unestimated".to_string(), |m| format!("{m} min"));
    format!(
        "{} [{}] {} priority, {}, {} ({})",
        item.title, item.project, item.priority, item.required_capability, estimate, item.status
    )
}

fn print_backlog(backlog: &Backlog) {
    let ranked = backlog.ranked();

    for warning in &backlog.report.warnings {
        println!("warning: {warning}");
    }
    for link in &backlog.links {
        println!("warning: {link}");
    }
    if !backlog.report.warnings.is_empty() || !backlog.links.is_empty() {
        println!();
    }

    if ranked.is_empty() {
        println!("Backlog is empty: every work item is complete.");
        return;
    }
    if let Some(item) = ranked.continue_last {
        println!("  0. Continue: {}", describe(item));
    }
    let mut n = 1;
    if !ranked.ready.is_empty() {
        println!("Ready:");
        for item in &ranked.ready {
            println!("  {n}. {}", describe(item));
            n += 1;
        }
    }
    if !ranked.blocked.is_empty() {
        println!("Blocked:");
        for item in &ranked.blocked {
            let waiting: Vec<&str> = item.blocked_by.iter().map(String::as_str).collect();
            println!("  {n}. {} (waiting on {})", describe(item), waiting.join(", "));
            n += 1;
        }
    }
}

/// Read a selection from stdin. Empty input or `q` cancels.
async fn prompt_index() -> anyhow::Result<Option<usize>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"\nSelect an item (q to cancel): ").await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read selection from stdin")?;
    let answer = line.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    let index = answer
        .parse()
        .with_context(|| format!("'{answer}' is not a backlog index"))?;
    Ok(Some(index))
}

fn print_handoff(handoff: &Handoff) {
    if let Some(report) = &handoff.inference {
        println!("{report}");
        println!();
    }
    match &handoff.step {
        HandoffStep::Dispatch(doc) => print!("{doc}"),
        HandoffStep::Closed(item) => {
            println!("All subtasks of '{}' are done.", item.title);
            println!(
                "Marked {} Complete in {}/TASKS.md. Run `handoff select` to pick the next item.",
                item.id, item.project
            );
        }
    }
}
