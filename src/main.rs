//! rplus - merge queue bot

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rplus")]
#[command(about = "Merge queue bot: test approved pull requests against trunk, then merge them")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config dir)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Override the listen port from the settings
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Inspect persisted queues
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print the stored queue record of a repository
    Show {
        /// Repository as `owner/name`
        repo: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let ctx = cli::AppContext::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => cli::run_serve(ctx, port).await,
        Commands::Queue {
            action: QueueAction::Show { repo },
        } => cli::run_queue_show(&ctx, &repo),
    }
}
