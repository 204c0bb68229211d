//! `conductor` command-line front end: config loading, hot reload, and task runs.

mod config;
mod config_watcher;
mod invoker;

use clap::{Parser, Subcommand};
use conductor_core::{ConfigSource, SharedConfig};
use conductor_orchestrator::{Orchestrator, TaskResult};
use config::{load_config, parse_context};
use config_watcher::ConfigWatcher;
use invoker::CommandInvoker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: task distribution engine for agent teams")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a task end to end and print the result
    Run {
        /// Task description
        description: String,
        /// Context entries as key=value (repeatable)
        #[arg(short = 'c', long = "context")]
        context: Vec<String>,
        /// Keep reading task descriptions from stdin, reloading the config
        /// file whenever it changes
        #[arg(long)]
        watch: bool,
    },
    /// Show analysis, scores, selection, and the plan without invoking anything
    Plan {
        /// Task description
        description: String,
        /// Context entries as key=value (repeatable)
        #[arg(short = 'c', long = "context")]
        context: Vec<String>,
    },
    /// List registered agents
    Agents,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let snapshot = load_config(&cli.config)?;
    info!(
        path = %cli.config.display(),
        agents = snapshot.agents.len(),
        tools = snapshot.effective_tools().len(),
        "Configuration loaded"
    );
    let shared = Arc::new(SharedConfig::new(snapshot)?);
    let source: Arc<dyn ConfigSource> = shared.clone();
    let invoker = Arc::new(CommandInvoker::new(source.clone()));
    let orchestrator = Orchestrator::new(source.clone(), invoker);

    match cli.command {
        Commands::Run {
            description,
            context,
            watch,
        } => {
            let context = parse_context(&context)?;
            let result = orchestrator.process_task(&description, context.clone()).await?;
            print_result(&result)?;

            if watch {
                let _watcher = ConfigWatcher::into_shared(cli.config.clone(), 500, shared)?;
                info!("Reading further tasks from stdin, one per line");
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Some(line) = lines.next_line().await? {
                    let description = line.trim();
                    if description.is_empty() {
                        continue;
                    }
                    match orchestrator.process_task(description, context.clone()).await {
                        Ok(result) => print_result(&result)?,
                        Err(e) => tracing::error!(error = %e, "Task could not be processed"),
                    }
                }
            }

            let health = orchestrator.monitor().health();
            info!(
                tasks = health.tasks,
                success_rate = health.success_rate,
                score = health.score,
                status = ?health.status,
                "Session health"
            );
        }
        Commands::Plan {
            description,
            context,
        } => {
            let preview = orchestrator.preview(&description, parse_context(&context)?)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::Agents => {
            let snapshot = source.snapshot();
            if snapshot.agents.is_empty() {
                println!("No agents registered in {}", cli.config.display());
            }
            for agent in &snapshot.agents {
                let tags = if agent.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", agent.tags.join(", "))
                };
                println!("{:<20} {}{tags}", agent.id, agent.capabilities);
                if let Some(command) = &agent.command {
                    println!("{:<20} command: {command}", "");
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &TaskResult) -> anyhow::Result<()> {
    if let TaskResult::Clarification { task_id, .. } = result {
        info!(task_id = %task_id, "Task needs clarification before it can run");
    }
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
