//! # Doc Siphon CLI (`siphon`)
//!
//! The `siphon` binary is the primary interface for Doc Siphon. It provides
//! commands for database initialization, datasource extraction, search,
//! document retrieval, embedding management, and corpus export.
//!
//! ## Usage
//!
//! ```bash
//! siphon --config ./config/siphon.json <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `siphon init` | Create the SQLite database and run schema migrations |
//! | `siphon sources` | List configured datasources with counts and sync times |
//! | `siphon sync [datasource]` | Extract one datasource, or all of them |
//! | `siphon search "<query>"` | Search indexed documents |
//! | `siphon get <id>` | Retrieve a full document by UUID |
//! | `siphon stats` | Show database totals and per-datasource breakdown |
//! | `siphon export` | Dump all documents and chunks as JSON |
//! | `siphon embed pending` | Backfill missing or stale embeddings |
//! | `siphon embed rebuild` | Delete and regenerate all embeddings |
//! | `siphon completions <shell>` | Generate shell completion scripts |
//!
//! ## Examples
//!
//! ```bash
//! # Create the database
//! siphon init --config ./config/siphon.json
//!
//! # Extract every configured datasource
//! siphon sync
//!
//! # Extract only Confluence, at most 50 documents
//! siphon sync confluence --limit 50
//!
//! # Preview what a sync would ingest
//! siphon sync bundestag --dry-run
//!
//! # Plain keyword search
//! siphon search "energy policy"
//!
//! # Hybrid search filtered to one datasource
//! siphon search "Wasserstoffstrategie" --mode hybrid --datasource bundestag
//! ```

mod chunk;
mod config;
mod datasource_bundestag;
mod datasource_confluence;
mod datasource_hackernews;
mod datasource_notion;
mod datasource_pdf;
mod db;
mod embed_cmd;
mod embedding;
mod export;
mod extract;
mod get;
mod http;
mod ingest;
mod migrate;
mod models;
mod progress;
mod search;
mod sources;
mod stats;
mod text;
mod traits;

use anyhow::bail;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::progress::ProgressMode;

/// Doc Siphon CLI — a configuration-driven extraction pipeline that pulls
/// documents out of wikis, APIs, and local files into a searchable corpus.
///
/// All commands accept a `--config` flag pointing to a JSON configuration
/// file. See `config/siphon.example.json` for a full example.
#[derive(Parser)]
#[command(
    name = "siphon",
    about = "Doc Siphon — pull documents from wikis, APIs, and local files into a searchable corpus",
    version,
    long_about = "Doc Siphon provides a datasource-driven extraction pipeline for ingesting \
    documents from multiple sources (Notion, Confluence, local PDFs, the German Bundestag, \
    Hacker News), chunking and embedding them, and exposing hybrid search (keyword + semantic) \
    through the CLI."
)]
struct Cli {
    /// Path to configuration file (JSON).
    ///
    /// Defaults to `./config/siphon.json`. All datasource, database, and
    /// embedding settings are read from this file.
    #[arg(long, global = true, default_value = "./config/siphon.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands of the `siphon` binary.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file, the document and chunk tables, the FTS5
    /// index, and the embedding tables. Safe to run repeatedly.
    Init,

    /// List configured datasources.
    ///
    /// Shows every datasource the config enables, how many documents each
    /// has contributed, and when it was last synced.
    Sources,

    /// Extract documents from one datasource, or all of them.
    ///
    /// Runs the reader and parser for the selected datasource, normalizes
    /// records into documents, chunks them, optionally embeds them, and
    /// stores everything in SQLite. Unchanged documents are skipped unless
    /// `--full` is given.
    Sync {
        /// Datasource name (`notion`, `confluence`, `pdf`, `bundestag`,
        /// `hackernews`) or `all`.
        #[arg(default_value = "all")]
        datasource: String,

        /// Ignore stored content hashes and reingest every document.
        #[arg(long)]
        full: bool,

        /// Show document and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Only keep documents updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only keep documents updated on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of documents to ingest per datasource.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search indexed documents.
    ///
    /// Queries the corpus using the selected mode and prints ranked
    /// results with scores and snippets, grouped by document.
    Search {
        /// Query text.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`
        /// (weighted merge). Semantic and hybrid modes require an embedding
        /// provider to be configured.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Filter results to a single datasource (e.g. `confluence`).
        #[arg(long)]
        datasource: Option<String>,

        /// Drop documents last updated before this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Cap the number of documents printed.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print one document in full.
    ///
    /// Looks up a document by id and shows its metadata, body text, and
    /// chunk boundaries.
    Get {
        /// The document id printed by `search`.
        id: String,
    },

    /// Show database totals and a per-datasource breakdown.
    Stats,

    /// Dump all documents and chunks as JSON.
    ///
    /// Writes to stdout unless `--output` is given.
    Export {
        /// Write the JSON payload to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Embedding maintenance.
    ///
    /// Backfill or rebuild the vector side of the index. Needs an
    /// embedding provider (OpenAI or Ollama) in the config.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Generate shell completion scripts.
    ///
    /// Prints a completion script for the given shell to stdout, e.g.
    /// `siphon completions bash > /etc/bash_completion.d/siphon`.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Actions under `siphon embed`.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks whose vectors are missing or out of date.
    ///
    /// Compares stored text hashes against the embeddings table and
    /// generates vectors for whatever does not match.
    Pending {
        /// Embed at most this many chunks.
        #[arg(long)]
        limit: Option<usize>,

        /// Texts per embedding API call (overrides the config value).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Report what would be embedded without calling the provider.
        #[arg(long)]
        dry_run: bool,
    },

    /// Wipe stored vectors and embed every chunk from scratch.
    ///
    /// Use after switching embedding models or dimensions; stored vectors
    /// are only valid for the model that produced them.
    Rebuild {
        /// Texts per embedding API call (overrides the config value).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn parse_progress_mode(flag: Option<&str>) -> anyhow::Result<ProgressMode> {
    match flag {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => bail!(
            "Unknown progress mode: {}. Use off, human, or json.",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Completions don't need a config file
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync {
            datasource,
            full,
            dry_run,
            since,
            until,
            limit,
            progress,
        } => {
            let mode = parse_progress_mode(progress.as_deref())?;
            let reporter = mode.reporter();
            ingest::run_sync(
                &cfg,
                &datasource,
                full,
                dry_run,
                since,
                until,
                limit,
                reporter.as_ref(),
            )
            .await?;
        }
        Commands::Search {
            query,
            mode,
            datasource,
            since,
            limit,
        } => {
            search::run_search(&cfg, &query, &mode, datasource, since, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Completions { .. } => {
            // Already dispatched before the config was loaded
            unreachable!()
        }
    }

    Ok(())
}
