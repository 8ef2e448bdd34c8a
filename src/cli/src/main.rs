//! Strand CLI - inspect and drive a Strand event log.
//!
//! Talks to PostgreSQL directly through `strand-core`.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use strand_core::config::Config;
use strand_core::db::Database;
use strand_core::events::EventStore;
use strand_core::telemetry::init_logging;

use commands::{agent, events, migrate};
use output::OutputFormat;

/// Strand - event-sourced aggregate store
#[derive(Parser)]
#[command(
    name = "strand",
    version,
    about = "Strand - event-sourced aggregate store",
    long_about = "CLI tool for migrating, reading and writing a Strand event log.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (environment variables still override it)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply or inspect schema migrations
    Migrate(migrate::MigrateArgs),

    /// Show one aggregate's history
    Events(events::EventsArgs),

    /// Read the log in position order
    Tail(events::TailArgs),

    /// Print the highest committed position
    Position,

    /// Agent commands
    #[command(subcommand)]
    Agent(agent::AgentCommands),
}

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    init_logging(&config.logging, &config.environment)?;

    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    let store: Arc<dyn EventStore> = Arc::new(db.event_store(&config.store));
    let format = cli.output;

    match cli.command {
        Commands::Migrate(args) => migrate::execute(args, &db, format).await,
        Commands::Events(args) => events::history(args, store.as_ref(), format).await,
        Commands::Tail(args) => events::tail(args, store.as_ref(), format).await,
        Commands::Position => events::position(store.as_ref(), format).await,
        Commands::Agent(cmd) => agent::execute(cmd, store, format).await,
    }
}
