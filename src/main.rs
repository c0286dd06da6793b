mod api;
mod cli;
mod config;
mod db;
mod error;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "matchmind")]
#[command(about = "Football match outcome prediction from recent form")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Overrides API_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the database schema
    InitDb,
    /// Load matches from a results CSV
    Ingest {
        /// Defaults to DATA_CSV_PATH
        csv_path: Option<PathBuf>,
    },
    /// Load a deterministic demo league
    Seed,
    /// Train a new model on the stored history
    Train,
    /// Predict a fixture by team name
    Predict {
        #[arg(long)]
        home: String,
        #[arg(long)]
        away: String,
        #[arg(long, default_value = "2023-24")]
        season: String,
    },
    /// Show a team's recent results
    Form {
        #[arg(long)]
        name: String,
        #[arg(short, default_value = "5")]
        n: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("matchmind=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(settings.api_port);
            tracing::info!("Starting MatchMind API server on port {}", port);
            api::serve(settings, port).await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            cli::init_db(&settings).await?;
        }
        Some(Commands::Ingest { csv_path }) => cli::ingest_matches(&settings, csv_path).await?,
        Some(Commands::Seed) => cli::seed_demo(&settings).await?,
        Some(Commands::Train) => cli::train_model(&settings).await?,
        Some(Commands::Predict { home, away, season }) => {
            cli::predict_match(&settings, &home, &away, &season).await?;
        }
        Some(Commands::Form { name, n }) => cli::show_form(&settings, &name, n).await?,
        None => {
            // Default to serving
            let port = settings.api_port;
            tracing::info!("Starting MatchMind API server on port {}", port);
            api::serve(settings, port).await?;
        }
    }

    Ok(())
}
