//! # PetCare Companion CLI (`petcare`)
//!
//! Command-line front end for the retrieval core: ingest pet-care documents,
//! search them, and inspect or reset the index.
//!
//! ## Usage
//!
//! ```bash
//! petcare --config ./config/petcare.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `petcare ingest <path>` | Ingest one document |
//! | `petcare ingest-dir [dir]` | Ingest every supported document in a directory |
//! | `petcare search "<query>"` | Nearest-neighbour search with source attribution |
//! | `petcare stats` | Entry, source and dimension counts |
//! | `petcare reset` | Drop the index and its snapshot |
//! | `petcare completions <shell>` | Print shell completions |
//!
//! Without `--config` every setting takes its default, which keeps the
//! index in memory for the lifetime of the command. Set `index.persist_dir`
//! to keep it between runs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use petcare_companion::config::{self, Config};
use petcare_companion::context::AppContext;
use petcare_companion::index::Index;
use tracing_subscriber::EnvFilter;

/// PetCare Companion: document ingestion and semantic search for pet-care questions.
#[derive(Parser)]
#[command(name = "petcare", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single document (.pdf, .docx, .txt, .md, .csv).
    Ingest {
        path: PathBuf,

        /// Source ID used for attribution. Defaults to the file name.
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Ingest every supported document in a directory.
    ///
    /// Failures are reported per document and do not stop the run.
    IngestDir {
        /// Directory to ingest. Defaults to `knowledge.dir`.
        dir: Option<PathBuf>,
    },

    /// Search the index. The knowledge directory is loaded first, if configured.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delete the persisted snapshot, even one built with another model.
    Reset,

    /// Generate shell completions.
    Completions { shell: Shell },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    }
}

fn default_source_id(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .with_context(|| format!("cannot derive a source ID from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "petcare", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose);
    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { path, source_id } => {
            let source_id = match source_id {
                Some(id) => id,
                None => default_source_id(&path)?,
            };
            let ctx = AppContext::open(cfg).await?;
            let chunks = ctx.retriever.ingest_document(&path, &source_id).await?;
            println!("ingest {}", source_id);
            println!("  chunks: {}", chunks);
            ctx.shutdown().await?;
        }
        Commands::IngestDir { dir } => {
            let dir = match dir.or_else(|| cfg.knowledge.dir.clone()) {
                Some(dir) => dir,
                None => bail!("No directory given and knowledge.dir is not configured"),
            };
            let ctx = AppContext::open(cfg).await?;
            let outcomes = ctx.retriever.ingest_directory(&dir).await?;

            println!("ingest-dir {}", dir.display());
            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(chunks) => println!("  ok     {} ({} chunks)", outcome.source_id, chunks),
                    Err(e) => {
                        failed += 1;
                        println!("  failed {} [{}] {}", outcome.source_id, e.kind(), e);
                    }
                }
            }
            println!(
                "  documents: {}  succeeded: {}  failed: {}",
                outcomes.len(),
                outcomes.len() - failed,
                failed
            );
            ctx.shutdown().await?;
        }
        Commands::Search { query, top_k, json } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let ctx = AppContext::init(cfg).await?;
            let hits = ctx.retriever.query(&query, top_k).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!("{}. [{:.2}] {}", i + 1, hit.score, hit.source_id);
                    println!("    excerpt: \"{}\"", hit.text.replace('\n', " ").trim());
                    println!();
                }
            }
            ctx.shutdown().await?;
        }
        Commands::Stats { json } => {
            let ctx = AppContext::init(cfg).await?;
            let stats = ctx.retriever.index_stats();

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("PetCare Companion: Index Stats");
                println!("==============================");
                println!();
                println!("  Model:       {}", ctx.embedder.model_name());
                println!("  Dimension:   {}", stats.dimension);
                println!("  Entries:     {}", stats.entry_count);
                println!("  Sources:     {}", stats.processed_source_count);
                match ctx.index.persist_dir() {
                    Some(dir) => println!("  Snapshot:    {}", dir.display()),
                    None => println!("  Snapshot:    (in-memory)"),
                }
            }
            ctx.shutdown().await?;
        }
        Commands::Reset => {
            // Never load the snapshot: it may belong to another model.
            if let Some(dir) = &cfg.index.persist_dir {
                Index::remove_snapshot(dir).await?;
            }
            println!("Index cleared.");
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
