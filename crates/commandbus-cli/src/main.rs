//! Operator CLI over the troubleshooting queue and batch read APIs (spec
//! §4.6/§4.5). Not a web UI: every action here has a `Bus`/`tsq` method
//! underneath that a producer process could call directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commandbus_core::{Bus, CommandBusConfig};
use commandbus_pgmq::QueueClient;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;
mod output;

use commands::{batch, tsq};

#[derive(Parser)]
#[command(name = "commandbus")]
#[command(about = "Operator CLI for the command bus troubleshooting queue and batches", long_about = None)]
struct Cli {
    /// Path to a CommandBusConfig TOML file (defaults + COMMANDBUS__ env vars otherwise)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Troubleshooting queue operations
    Tsq {
        #[command(subcommand)]
        command: TsqCommand,
    },
    /// Batch aggregate operations
    Batch {
        #[command(subcommand)]
        command: BatchCommand,
    },
}

#[derive(Subcommand)]
pub enum TsqCommand {
    /// List commands currently parked in the troubleshooting queue
    List {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        command_type: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Re-enqueue a parked command for another delivery attempt
    Retry {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        command_id: Uuid,
    },
    /// Cancel a parked command without retrying it
    Cancel {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        command_id: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Mark a parked command completed with an operator-supplied result
    Complete {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        command_id: Uuid,
        /// Inline JSON result data
        #[arg(long)]
        result: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BatchCommand {
    /// Show a batch's aggregate completion stats
    Status {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        batch_id: Uuid,
    },
    /// List every command belonging to a batch
    ListCommands {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        batch_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = CommandBusConfig::load(cli.config.as_deref()).context("loading commandbus config")?;

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to the command bus database")?;

    let queue = QueueClient::new(pool.clone());
    let bus = Bus::new(pool, queue, config);

    match cli.command {
        Commands::Tsq { command } => tsq::run(&bus, command, cli.json).await,
        Commands::Batch { command } => batch::run(&bus, command, cli.json).await,
    }
}
