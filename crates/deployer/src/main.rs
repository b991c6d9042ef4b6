use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use deployer::memory::InMemoryHost;
use deployer::orchestrator::classify_request;
use deployer::notifier::HttpTransport;
use deployer::{server, telemetry, DeployerConfig, TaskOrchestrator, TaskRequest};

#[derive(Debug, Parser)]
#[command(name = "deployer", version, about = "Generate, publish and report task deployments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept task requests over HTTP.
    Serve {
        /// TOML config file; unset fields come from the environment.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the listen address.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Process a single request file and print the run report.
    Run {
        request: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Publish to an in-memory repository and skip the notification.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the generation strategy a request would use. Attachments are
    /// decoded into a temporary directory first, so undecodable ones do not count.
    Classify { request: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, bind } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            info!(owner = %config.github_owner, bind = %config.bind_addr, "Deployer starting");
            server::serve(config).await
        }
        Command::Run {
            request,
            config,
            dry_run,
        } => run_once(&request, config.as_deref(), dry_run).await,
        Command::Classify { request } => {
            let request = read_request(&request)?;
            let scratch =
                std::env::temp_dir().join(format!("deployer-classify-{}", Uuid::new_v4()));
            let strategy = classify_request(&request, &scratch);
            if scratch.exists() {
                if let Err(e) = std::fs::remove_dir_all(&scratch) {
                    warn!(path = %scratch.display(), error = %e, "Failed to remove scratch dir");
                }
            }
            println!("{strategy}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DeployerConfig> {
    match path {
        Some(path) => DeployerConfig::from_toml_file(path),
        None => DeployerConfig::from_env(),
    }
}

fn read_request(path: &Path) -> Result<TaskRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid task request in {}", path.display()))
}

async fn run_once(request_path: &Path, config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let mut request = read_request(request_path)?;

    if !dry_run {
        let config = load_config(config_path)?;
        let orchestrator = TaskOrchestrator::from_config(&config)?;
        let report = orchestrator.run(request).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // A dry run needs no GitHub credentials.
    let mut config = match config_path {
        Some(path) => DeployerConfig::from_toml_file(path)?,
        None => DeployerConfig::from_env().unwrap_or_else(|e| {
            info!("Using default dry-run config: {e:#}");
            let owner = std::env::var("GITHUB_USERNAME").unwrap_or_else(|_| "dry-run".into());
            DeployerConfig::new("", owner)
        }),
    };
    config.settle_delay = Duration::ZERO;
    request.evaluation_url = None;

    let host = Arc::new(InMemoryHost::new(config.github_owner.clone()));
    let transport = Arc::new(HttpTransport::new(config.http_timeout)?);
    let orchestrator = TaskOrchestrator::with_host(&config, host.clone(), transport)?;
    let task = request.task.clone();
    let report = orchestrator.run(request).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("\nRepository layout ({task}):");
    for path in host.paths(&task) {
        let size = host.file(&task, &path).map(|b| b.len()).unwrap_or_default();
        println!("  {path} ({size} bytes)");
    }
    for commit in host.commits(&task) {
        println!("  {} {}", &commit.sha[..commit.sha.len().min(8)], commit.message);
    }
    Ok(())
}
