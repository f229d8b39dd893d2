use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::codec;
use crate::config::Config;
use crate::db;
use crate::persistence::{SqlitePersister, StepPersister};
use crate::scheduler::SqliteScheduler;
use crate::types::now_millis;

#[derive(Parser)]
#[command(name = "cadenza")]
#[command(about = "Cadenza - durable workflows by deterministic replay", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// List the cached step records of an execution
    Steps {
        /// Execution ID to inspect
        execution_id: String,
    },

    /// Show queued tasks and pending timers
    Queue {
        /// Number of results per section (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: usize,
    },

    /// Delete every step record, queued task and timer
    Purge {
        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed by an embedding application.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load and validate configuration before executing any command
    let config = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config.map(std::path::PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    init_tracing(&config.log_level);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Migrate => {
            let pool = db::connect(&config.database_url).await?;
            db::migrate(&pool).await?;
            println!("✓ Migrations completed successfully!");
        }

        Commands::Steps { execution_id } => {
            let pool = db::connect(&config.database_url).await?;
            let persister = SqlitePersister::new(pool);
            let records = persister
                .list_steps(&execution_id)
                .await
                .context("Failed to list steps")?;

            if records.is_empty() {
                println!("No steps recorded for execution {}", execution_id);
                return Ok(());
            }

            println!("Execution {} ({} record(s)):\n", execution_id, records.len());
            for record in records {
                let kind = codec::deserialize(&record.payload)
                    .map(|response| response.kind().to_string())
                    .unwrap_or_else(|e| format!("<{}>", e));
                let state = if record.done { "done" } else { "retry pending" };
                println!(
                    "  {} | attempt {} | {} | {} | {}",
                    record.step_key,
                    record.attempt,
                    state,
                    kind,
                    record.created_at.to_rfc3339()
                );
            }
        }

        Commands::Queue { limit } => {
            let pool = db::connect(&config.database_url).await?;
            let scheduler = SqliteScheduler::new(pool);

            let tasks = scheduler.pending_tasks().await.context("Failed to read task queue")?;
            println!("Queued tasks: {}", tasks.len());
            let now = now_millis();
            for queued in tasks.iter().take(limit) {
                let state = if queued.is_claimed(now) {
                    format!("claimed until {}", queued.visible_from)
                } else {
                    "ready".to_string()
                };
                println!(
                    "  #{} | {} | {} | enqueued {} | {}",
                    queued.id,
                    queued.task.workflow_id,
                    queued.task.execution_id,
                    queued.enqueued_at,
                    state
                );
            }

            let timers = scheduler.pending_timers().await.context("Failed to read timers")?;
            println!("\nPending timers: {}", timers.len());
            for timer in timers.iter().take(limit) {
                println!(
                    "  #{} | {} | {} | fires {}",
                    timer.id, timer.task.workflow_id, timer.task.execution_id, timer.fire_at
                );
            }
        }

        Commands::Purge { yes } => {
            if !yes {
                eprintln!("Error: Confirmation required. Use --yes flag to confirm purge.");
                std::process::exit(1);
            }

            let pool = db::connect(&config.database_url).await?;
            let steps = SqlitePersister::new(pool.clone())
                .delete_all()
                .await
                .context("Failed to delete steps")?;
            let scheduled = SqliteScheduler::new(pool)
                .purge()
                .await
                .context("Failed to purge scheduler tables")?;

            println!("✓ Removed {} step record(s) and {} scheduled task(s)", steps, scheduled);
        }
    }

    Ok(())
}
