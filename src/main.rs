mod cli;
mod config;
mod db;
mod embedding;
mod error;
mod memory;
mod server;
mod validation;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engram", version, about = "Cognitive memory store with sector decay and consolidation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Search memories from the terminal
    Search {
        /// User whose memories are searched
        #[arg(long, default_value = "default")]
        user: String,
        /// Natural language query
        query: String,
    },
    /// Display memory statistics
    Stats {
        /// Restrict stats to a specific user
        #[arg(long)]
        user: Option<String>,
    },
    /// Export a user's memories as JSON
    Export {
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// Import memories from a JSON export file
    Import {
        #[arg(long, default_value = "default")]
        user: String,
        /// Path to JSON file
        file: PathBuf,
        /// Replace the user's memories instead of merging by id
        #[arg(long)]
        replace: bool,
        /// Re-embed content instead of using the file's vectors
        #[arg(long)]
        regenerate_embeddings: bool,
    },
    /// Run one decay maintenance tick (batch decay + pruning)
    Maintain,
    /// Consolidate a user's episodic memories into semantic summaries
    Consolidate {
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// Delete all memories (requires confirmation)
    Reset,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.engram/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = config::EngramConfig::load()?;

    // Log to stderr so stdout stays clean for export output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            server::serve(config).await?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
        Command::Search { user, query } => {
            cli::search::run(&config, &user, &query).await?;
        }
        Command::Stats { user } => {
            cli::stats::stats(&config, user.as_deref())?;
        }
        Command::Export { user } => {
            cli::export::export(&config, &user)?;
        }
        Command::Import {
            user,
            file,
            replace,
            regenerate_embeddings,
        } => {
            cli::import::import(&config, &user, &file, replace, regenerate_embeddings)?;
        }
        Command::Maintain => {
            cli::maintenance::maintain(&config)?;
        }
        Command::Consolidate { user } => {
            cli::maintenance::consolidate_user(&config, &user)?;
        }
        Command::Reset => {
            cli::reset::reset(&config)?;
        }
    }

    Ok(())
}
