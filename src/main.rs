//! # Citation Drift CLI (`cdrift`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cdrift ingest <paths>...` | Chunk and embed a corpus, persist the chunk index |
//! | `cdrift ingest <paths>... --draft <file>` | Same, then check a draft against it |
//! | `cdrift check <draft>` | Check a draft against the persisted index |
//! | `cdrift cache stats` | Describe the embedding cache |
//! | `cdrift cache clear` | Delete the embedding cache |
//!
//! ## Examples
//!
//! ```bash
//! # Index a directory of PDFs and check a markdown summary
//! cdrift ingest ./docs --draft ./summary.md
//!
//! # Re-check an edited draft with the LLM judge on borderline sentences
//! cdrift check ./summary.md --judge
//!
//! # Count chunks without calling any API
//! cdrift ingest ./docs --dry-run
//! ```
//!
//! `OPENAI_API_KEY` is required for the `openai` embedding provider and
//! for the judge.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use citation_drift::config::{self, Config};
use citation_drift::embedding::cache;
use citation_drift::flags::flags_path;
use citation_drift::pipeline::{self, Services};
use citation_drift::progress::ProgressMode;
use citation_drift::report::RunSummary;

/// Citation Drift: flag summary sentences whose meaning drifts from the
/// sources they cite.
#[derive(Parser)]
#[command(
    name = "cdrift",
    about = "Flag summary sentences whose meaning drifts from the sources they cite",
    version,
    long_about = "Citation Drift ingests a document corpus into stably-identified chunks, \
    embeds them through a content-addressed cache, and checks a draft summary sentence by \
    sentence against the chunks it cites, flagging low-similarity and unresolvable citations."
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (e.g. `info`, `citation_drift=debug`).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `ingest` and `check`.
#[derive(clap::Args)]
struct RunArgs {
    /// Output directory for the index, flags and summary (overrides `[output].dir`).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Similarity threshold in [0, 1]; scores at or above it are accepted.
    #[arg(long)]
    threshold: Option<f32>,

    /// Escalate borderline sentences to the LLM judge.
    #[arg(long)]
    judge: bool,

    /// Progress on stderr: `auto`, `off`, `human`, or `json`.
    #[arg(long, default_value = "auto")]
    progress: String,

    /// Exit with status 2 when any sentence is flagged.
    #[arg(long)]
    fail_on_flags: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the chunk index from documents and directories.
    ///
    /// Supported formats: PDF, DOCX, PPTX, Markdown and plain text.
    /// Files that fail to extract are skipped and listed in the summary.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Check this draft against the new index once it is built.
        #[arg(long)]
        draft: Option<PathBuf>,

        /// Chunk and count only; no embeddings, no API calls, no files written.
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Check a draft against the persisted chunk index.
    ///
    /// `.json` drafts are read as structured drafts; PDF and DOCX drafts
    /// are extracted to text; anything else is read as markdown.
    Check {
        /// Draft file.
        draft: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Inspect or clear the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show the cache path, model, dimensionality and entry count.
    Stats,
    /// Delete the cache file.
    Clear,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(atty::is(atty::Stream::Stderr)),
            )
            .init();
    }
}

/// Apply command-line overrides, then validate.
fn resolve_config(path: Option<&Path>, run: &RunArgs) -> Result<Config> {
    let mut config = match path {
        Some(p) => config::read_config(p)?,
        None => Config::default(),
    };
    if let Some(dir) = &run.out_dir {
        config.output.dir = dir.clone();
    }
    if let Some(threshold) = run.threshold {
        config.drift.threshold = threshold;
    }
    if run.judge {
        config.judge.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

fn progress_mode(value: &str) -> Result<ProgressMode> {
    match ProgressMode::parse(value) {
        Some(mode) => Ok(mode),
        None => bail!("--progress must be auto, off, human, or json; got '{}'", value),
    }
}

fn finish(summary: &RunSummary, flags_written: Option<PathBuf>, fail_on_flags: bool) {
    summary.print();
    if let Some(path) = flags_written {
        println!("flags: {}", path.display());
    }
    let flagged = summary.check.as_ref().map(|c| c.stats.flagged).unwrap_or(0);
    if fail_on_flags && flagged > 0 {
        std::process::exit(2);
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "cdrift starting");

    match &cli.command {
        Commands::Ingest {
            paths,
            draft,
            dry_run,
            run,
        } => {
            let config = resolve_config(cli.config.as_deref(), run)?;
            let progress = progress_mode(&run.progress)?.reporter();

            if *dry_run {
                if draft.is_some() {
                    info!("--draft is ignored with --dry-run");
                }
                let summary = pipeline::ingest_dry_run(paths, &config, progress.as_ref())?;
                println!("ingest (dry-run)");
                summary.print();
                return Ok(());
            }

            let services = Services::from_config(&config)?;
            let summary =
                pipeline::run_ingest(paths, draft.as_deref(), &config, &services, progress.as_ref())
                    .await?;
            let written = draft.as_ref().map(|_| flags_path(&config.output.dir));
            finish(&summary, written, run.fail_on_flags);
        }

        Commands::Check { draft, run } => {
            let config = resolve_config(cli.config.as_deref(), run)?;
            let progress = progress_mode(&run.progress)?.reporter();
            let services = Services::from_config(&config)?;
            let (summary, _) =
                pipeline::run_check(draft, &config, &services, progress.as_ref()).await?;
            finish(&summary, Some(flags_path(&config.output.dir)), run.fail_on_flags);
        }

        Commands::Cache { action } => {
            let config = config::load_or_default(cli.config.as_deref())?;
            let path = config.cache_path();
            match action {
                CacheAction::Stats => match cache::inspect(&path)? {
                    Some(info) => {
                        println!("Embedding cache");
                        println!("  Path:    {}", info.path);
                        println!("  Size:    {}", format_bytes(info.bytes));
                        println!("  Model:   {}", info.model);
                        match info.dims {
                            Some(d) => println!("  Dims:    {}", d),
                            None => println!("  Dims:    -"),
                        }
                        println!("  Entries: {}", info.entries);
                    }
                    None => println!("No embedding cache at {}", path.display()),
                },
                CacheAction::Clear => {
                    if cache::clear(&path)? {
                        println!("Removed {}", path.display());
                    } else {
                        println!("No embedding cache at {}", path.display());
                    }
                }
            }
        }
    }

    Ok(())
}
