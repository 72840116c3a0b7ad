//! # Resource RAG CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and schema |
//! | `rag ingest [FOLDER]` | Ingest new PDF/CSV files from the resource folder |
//! | `rag search "<query>"` | Nearest chunks to a query |
//! | `rag resources list` | List ingested resources |
//! | `rag resources show <name>` | Print a resource and its chunks |
//! | `rag resources delete <name>` | Delete a resource and its chunks |
//! | `rag serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` to override the default
//! `resource_rag=info` filter.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resource_rag::{config, ingest, migrate, resources, search, server};

/// Resource RAG: ingest PDF/CSV documents and search them semantically.
#[derive(Parser)]
#[command(name = "rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest every new file in the resource folder.
    ///
    /// Files whose name is already stored are skipped. A file that fails
    /// is logged and retried on the next run.
    Ingest {
        /// Folder to scan (defaults to `[ingest].folder`).
        folder: Option<PathBuf>,

        /// Report what would be ingested without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the corpus for the chunks nearest to a query.
    Search {
        /// Free-text query.
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict to a resource by name. Repeatable.
        #[arg(long = "resource")]
        resources: Vec<String>,
    },

    /// Inspect or remove ingested resources.
    Resources {
        #[command(subcommand)]
        action: ResourcesAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ResourcesAction {
    /// List resources with their chunk counts.
    List,
    /// Print a resource and its chunks.
    Show { name: String },
    /// Delete a resource and its chunks.
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "resource_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { folder, dry_run } => {
            ingest::run_ingest(&cfg, folder, dry_run).await?;
        }
        Commands::Search {
            query,
            top_k,
            resources,
        } => {
            search::run_search(&cfg, &query, top_k, &resources).await?;
        }
        Commands::Resources { action } => match action {
            ResourcesAction::List => resources::run_list(&cfg).await?,
            ResourcesAction::Show { name } => resources::run_show(&cfg, &name).await?,
            ResourcesAction::Delete { name } => resources::run_delete(&cfg, &name).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
