//! romforge: chat-driven recovery and boot image builder.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use romforge_config::{Settings, load_settings};
use romforge_executor::{GitFetcher, PipelineExecutor, ShellToolchain, Workspace};
use romforge_notify::telegram::TelegramTransport;
use romforge_notify::{LogAggregator, Notifier};
use romforge_scheduler::{BuildOrchestrator, WorkerEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod command;
mod poller;
mod router;

use router::Router;

#[derive(Parser)]
#[command(name = "romforge")]
#[command(about = "Chat-driven recovery and boot image builder", long_about = None)]
struct Cli {
    /// Path to the KDL configuration file
    #[arg(long, env = "ROMFORGE_CONFIG", default_value = "romforge.kdl")]
    config: PathBuf,

    /// Bot API token, overriding the configuration file
    #[arg(long, env = "ROMFORGE_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start polling for commands and building queued jobs
    Run,
    /// Parse the configuration and print the effective settings
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = load_settings(&cli.config)
        .with_context(|| format!("Failed to load config file: {}", cli.config.display()))?;

    match cli.command {
        Commands::Run => run(settings, cli.token).await,
        Commands::Validate => validate(&settings),
    }
}

async fn run(settings: Settings, token: Option<String>) -> Result<()> {
    let token = token
        .or_else(|| settings.bot.token.clone())
        .context("No bot token: pass --token, set ROMFORGE_BOT_TOKEN or add `token` to the bot node")?;
    let root = settings
        .workspace_root()
        .context("Cannot build without a workspace")?
        .to_path_buf();

    let transport = Arc::new(TelegramTransport::new(token, &settings.bot));
    let notifier = Notifier::new(transport.clone(), settings.notify.clone());
    let logs = LogAggregator::new(notifier.clone(), settings.logs.clone());

    let executor = PipelineExecutor::new(
        Workspace::new(&root),
        Arc::new(GitFetcher::new(settings.fetch.clone())),
        Arc::new(ShellToolchain::new(settings.toolchain.clone())),
        notifier.clone(),
        logs.clone(),
        settings.artifacts,
    );
    let orchestrator = BuildOrchestrator::new(Arc::new(executor), logs, &settings.sources);

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::JobStarted { job_id, .. } => {
                    debug!(job_id = %job_id, "Worker picked up job")
                }
                WorkerEvent::JobFinished { job_id, success, .. } => {
                    debug!(job_id = %job_id, success, "Worker finished job")
                }
                WorkerEvent::Idle { .. } => debug!("Worker idle"),
            }
        }
    });

    info!(
        workspace = %root.display(),
        admins = settings.bot.admins.len(),
        "Starting romforge"
    );

    let router = Arc::new(Router::new(
        orchestrator,
        notifier,
        settings.bot.admins.iter().copied(),
    ));
    poller::run(transport, router).await
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.workspace.root.is_none() {
        println!("Warning: no workspace root configured; `run` will refuse to start");
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    println!("Configuration is valid");
    Ok(())
}
