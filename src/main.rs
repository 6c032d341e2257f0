//! # docqa CLI
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP API |
//! | `docqa process <path>` | Extract, chunk, embed and index a `.pdf` or `.txt` file |
//! | `docqa query "<question>"` | Answer a question from an indexed document |
//! | `docqa list` | List known documents |
//! | `docqa delete <filename>` | Remove a document and its index |
//! | `docqa check` | Round-trip the embedding and generation services |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config};
use docqa::models::DocumentSummary;
use docqa::pipeline::{document_name, Pipeline};
use docqa::store::DocumentStore;

/// Question answering over uploaded documents.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is not an error: built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Process a document and make it queryable under its file name.
    Process {
        /// Path to a `.pdf` or `.txt` file.
        path: PathBuf,
    },

    /// Ask a question.
    Query {
        question: String,

        /// Document to ask (defaults to the most recently processed one).
        #[arg(long = "file")]
        file: Option<String>,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// List known documents.
    List,

    /// Delete a document and its persisted index.
    Delete { filename: String },

    /// Check connectivity to the embedding and generation services.
    Check,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "docqa=debug,tower_http=debug"
    } else {
        "docqa=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Build the pipeline with provider credentials. Only commands that call the
/// model services need this; `list` and `delete` work on the store alone.
fn connect(cfg: Arc<Config>) -> anyhow::Result<Arc<Pipeline>> {
    let api_key = std::env::var(&cfg.provider.api_key_env).with_context(|| {
        format!(
            "environment variable {} is not set",
            cfg.provider.api_key_env
        )
    })?;
    Ok(Arc::new(Pipeline::from_config(cfg, api_key)?))
}

fn print_documents(documents: &[DocumentSummary]) {
    if documents.is_empty() {
        println!("No documents.");
    }
    for doc in documents {
        let chunks = doc
            .chunks
            .map(|n| format!("{} chunks", n))
            .unwrap_or_else(|| "-".to_string());
        let when = doc
            .processed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let status = match &doc.last_attempt {
            Some(attempt) => format!("{} (last attempt: {})", doc.status.label(), attempt.label()),
            None => doc.status.label().to_string(),
        };
        println!("{}\t{}\t{}\t{}", doc.filename, status, chunks, when);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = Arc::new(load(&cli.config)?);

    match cli.command {
        Commands::Serve => {
            docqa::server::run_server(connect(cfg)?).await?;
        }
        Commands::Process { path } => {
            let filename = document_name(&path)
                .with_context(|| format!("not a file path: {}", path.display()))?
                .to_string();
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let outcome = connect(cfg)?.process(&filename, bytes).await?;
            println!(
                "{}: {} chunks, {} dimensions",
                outcome.filename, outcome.chunks, outcome.dims
            );
        }
        Commands::Query { question, file, k } => {
            let result = connect(cfg)?.query(&question, file.as_deref(), k).await?;
            println!("{}\n", result.answer);
            if result.no_relevant_content() {
                println!("(no sufficiently relevant passages in {})", result.filename);
            } else {
                println!("Sources ({}):", result.filename);
                for chunk in &result.ranked {
                    println!(
                        "  [{}] score {:.3}, chars {}..{}",
                        chunk.chunk_index, chunk.score, chunk.start, chunk.end
                    );
                }
            }
        }
        Commands::List => {
            let store = DocumentStore::open(&cfg.storage.data_dir)?;
            print_documents(&store.list().await);
        }
        Commands::Delete { filename } => {
            let store = DocumentStore::open(&cfg.storage.data_dir)?;
            let guard = store.lock_for_write(&filename).await?;
            if !store.remove(&guard).await? {
                bail!("no document named '{}'", filename);
            }
            println!("Deleted {}.", filename);
        }
        Commands::Check => {
            let report = connect(cfg)?.check().await;
            match &report.embedding {
                Ok(dims) => println!("embedding  {}: ok ({} dims)", report.embedding_model, dims),
                Err(e) => println!("embedding  {}: FAILED ({})", report.embedding_model, e),
            }
            match &report.generation {
                Ok(reply) => println!("generation {}: ok ({})", report.generation_model, reply),
                Err(e) => println!("generation {}: FAILED ({})", report.generation_model, e),
            }
            if !report.is_ok() {
                bail!("connectivity check failed");
            }
        }
    }

    Ok(())
}
