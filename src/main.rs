//! # Capability Lookup CLI (`caplook`)
//!
//! ## Usage
//!
//! ```bash
//! caplook --config ./config/caplook.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `caplook init` | Create the SQLite index and the collection |
//! | `caplook index` | Index every workbook under the sources root |
//! | `caplook search "<query>"` | Retrieve similar capabilities and analyze them |
//! | `caplook stats` | Show collection statistics |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use capability_lookup::analysis::AnalysisKind;
use capability_lookup::config::{self, DEFAULT_CONFIG_PATH};
use capability_lookup::engine::Engine;
use capability_lookup::ingest::IndexReport;
use capability_lookup::progress::ProgressMode;
use capability_lookup::search::{AnalysisResult, SearchStatus};
use capability_lookup::stats::print_stats;

/// Capability Lookup: search past estimation workbooks for similar
/// capabilities.
#[derive(Parser)]
#[command(
    name = "caplook",
    about = "Capability Lookup - search estimation workbooks for similar capabilities",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index schema and collection. Idempotent.
    Init,

    /// Index every workbook under the sources root.
    ///
    /// Re-indexing overwrites vectors by id; other files keep their vectors.
    /// Ctrl-C stops the run between files and chunks.
    Index {
        /// Directory to scan instead of `sources.root`.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Skip the run when the collection already holds vectors.
        #[arg(long)]
        if_empty: bool,

        /// Progress output on stderr. Defaults to human on a terminal, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search for capabilities similar to a free-text query.
    Search {
        query: String,

        /// Number of matches to retrieve (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show collection statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_default(&cli.config)?;
    let engine = Engine::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Index initialized at {} (collection '{}').",
                engine.config().index.path.display(),
                engine.config().index.collection
            );
        }
        Commands::Index {
            dir,
            if_empty,
            progress,
            json,
        } => {
            if if_empty && engine.collection().count().await? > 0 {
                println!("index: collection already populated, skipping (--if-empty)");
            } else {
                let cancel = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&cancel);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("cancellation requested, finishing current unit");
                        flag.store(true, Ordering::SeqCst);
                    }
                });

                let reporter = progress
                    .unwrap_or_else(ProgressMode::default_for_tty)
                    .reporter();
                let report = engine
                    .index(dir.as_deref(), cancel, reporter.as_ref())
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_report(&report);
                }
            }
        }
        Commands::Search { query, limit, json } => {
            let result = engine.search(&query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Stats { json } => {
            let stats = engine.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    engine.close().await;
    Ok(())
}

fn print_report(report: &IndexReport) {
    println!("index {}", report.root);
    println!("  files seen: {}", report.files_seen);
    println!("  files indexed: {}", report.files_indexed);
    println!("  files skipped (no recognized sheet): {}", report.files_skipped);
    println!("  files without header: {}", report.files_no_header);
    println!("  files failed: {}", report.files_failed);
    println!("  records: {}", report.records);
    println!("  rows skipped: {}", report.rows_skipped);
    println!("  chunks embedded: {} / {}", report.chunks_embedded, report.chunks);
    println!("  chunks failed: {}", report.chunks_failed);
    println!("  vectors written: {}", report.vectors_written);
    for failure in &report.failures {
        println!("  ! {}: {}", failure.file, failure.reason);
    }
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

fn print_result(result: &AnalysisResult) {
    println!("Query: {}", result.query);
    match result.status {
        SearchStatus::NoMatches => {
            println!("{}", result.summary);
            return;
        }
        SearchStatus::RetrievalFailed => {
            println!(
                "Retrieval failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
            return;
        }
        SearchStatus::Matched => {}
    }

    println!("Found {} matching capabilities", result.total_found);
    println!();
    for (i, m) in result.matches.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}  ({} / {})",
            i + 1,
            m.relevance,
            m.capability,
            m.file_name,
            m.sheet_name
        );
        if !m.source_link.is_empty() {
            println!("   {}", m.source_link);
        }
        println!("   > {}", m.excerpt);
    }
    for kind in AnalysisKind::ALL {
        println!();
        println!("## {}", kind.label());
        println!("{}", result.analysis(kind));
    }
}
