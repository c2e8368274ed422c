//! Indexing pipeline.
//!
//! Walks a directory for workbooks and runs each one through
//! file → sheets → records → chunks → embeddings → `VectorCollection::add`.
//!
//! Files are read and extracted on the blocking pool, up to
//! `indexing.file_concurrency` at a time. Chunks of one file are embedded
//! concurrently under a semaphore sized by `embedding.concurrency`, then
//! written in a single `add` call. Failures are isolated per unit:
//!
//! | Unit | Failure | Effect |
//! |------|---------|--------|
//! | file | unreadable workbook | counted in `files_failed`, batch continues |
//! | file | no header in any recognized sheet | counted in `files_no_header` |
//! | row | missing required field, summary row | counted in `rows_skipped` |
//! | chunk | embedding error or timeout | counted in `chunks_failed` |
//! | batch | vector store rejects `add` or times out | the whole run fails |
//!
//! Cancellation is cooperative: the flag is checked before each file is
//! read, between files, and before each chunk is embedded. Vectors written
//! before cancellation stay valid.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use capability_lookup_core::chunk::{chunk_record, ChunkConfig};
use capability_lookup_core::embedding::Embedder;
use capability_lookup_core::error::{EmbeddingError, SchemaInferenceError};
use capability_lookup_core::extract::{extract_sheet, ScanWindows, SheetLocation};
use capability_lookup_core::models::{CapabilityRecord, Chunk, IndexedVector};
use capability_lookup_core::schema::{classify_sheet, RuleSet};
use capability_lookup_core::store::VectorCollection;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SourcesConfig};
use crate::deadline::store_call;
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::workbook::{read_workbook, Sheet};

/// Summary of one indexing run, printed by `caplook index`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexReport {
    pub root: String,
    pub files_seen: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_no_header: u64,
    pub files_failed: u64,
    pub records: u64,
    pub rows_skipped: u64,
    pub chunks: u64,
    pub chunks_embedded: u64,
    pub chunks_failed: u64,
    pub vectors_written: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

/// What happened to one workbook during extraction.
#[derive(Debug)]
pub enum FileOutcome {
    Extracted {
        records: Vec<CapabilityRecord>,
        rows_skipped: usize,
    },
    /// No sheet name was recognized.
    Skipped,
    /// Recognized sheets existed but none yielded a header.
    NoHeader(SchemaInferenceError),
    Failed(String),
    Cancelled,
}

impl FileOutcome {
    fn status(&self) -> &'static str {
        match self {
            FileOutcome::Extracted { .. } => "extracted",
            FileOutcome::Skipped => "skipped",
            FileOutcome::NoHeader(_) => "no-header",
            FileOutcome::Failed(_) => "failed",
            FileOutcome::Cancelled => "cancelled",
        }
    }
}

/// Settings the pipeline needs, resolved once from [`Config`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub rules: RuleSet,
    pub windows: ScanWindows,
    pub chunking: ChunkConfig,
    pub file_concurrency: usize,
    pub embed_concurrency: usize,
    /// Deadline for one embed call, retries included.
    pub embed_timeout: Duration,
    /// Deadline for one `VectorCollection::add`.
    pub store_timeout: Duration,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            rules: RuleSet::capability_list().with_extra_synonyms(&config.schema.extra_synonyms),
            windows: ScanWindows {
                header: config.schema.scan_window,
                estimation: config.schema.estimation_scan_window,
            },
            chunking: ChunkConfig::new(config.chunking.chunk_size, config.chunking.overlap)?,
            file_concurrency: config.indexing.file_concurrency.max(1),
            embed_concurrency: config.embedding.concurrency.max(1),
            embed_timeout: config.embedding.call_deadline(),
            store_timeout: config.index.store_timeout(),
        })
    }
}

/// Find workbook files under `root`, sorted by path.
///
/// Office lock files (`~$name.xlsx`) are always excluded.
pub fn discover_workbooks(root: &Path, sources: &SourcesConfig) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Source directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&sources.include_globs)?;
    let mut excludes = vec!["**/~$*".to_string(), "**/.git/**".to_string()];
    excludes.extend(sources.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(sources.follow_symlinks) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Extract records from every recognized sheet of one workbook.
pub fn extract_sheets(
    sheets: &[Sheet],
    file_name: &str,
    file_path: &str,
    settings: &IndexSettings,
) -> FileOutcome {
    let mut records = Vec::new();
    let mut rows_skipped = 0usize;
    let mut recognized = 0usize;
    let mut last_error = None;

    for sheet in sheets {
        let Some(kind) = classify_sheet(&sheet.name) else {
            debug!(file = %file_name, sheet = %sheet.name, "ignoring unrecognized sheet");
            continue;
        };
        recognized += 1;
        let location = SheetLocation::new(file_name, file_path, &sheet.name);
        match extract_sheet(&sheet.table, kind, &settings.rules, settings.windows, &location) {
            Ok(outcome) => {
                for skipped in &outcome.skipped {
                    debug!(file = %file_name, sheet = %sheet.name, "{}", skipped);
                }
                rows_skipped += outcome.skipped.len();
                records.extend(outcome.records);
            }
            Err(e) => {
                warn!(file = %file_name, sheet = %sheet.name, kind = kind.as_str(), "{}", e);
                last_error = Some(e);
            }
        }
    }

    match (recognized, last_error) {
        (0, _) => FileOutcome::Skipped,
        (_, Some(e)) if records.is_empty() && rows_skipped == 0 => FileOutcome::NoHeader(e),
        _ => FileOutcome::Extracted {
            records,
            rows_skipped,
        },
    }
}

async fn extract_file(path: PathBuf, settings: Arc<IndexSettings>, cancel: Arc<AtomicBool>) -> FileOutcome {
    if cancel.load(Ordering::SeqCst) {
        return FileOutcome::Cancelled;
    }
    let task = tokio::task::spawn_blocking(move || {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_path = path.to_string_lossy().to_string();
        match read_workbook(&path) {
            Ok(sheets) => extract_sheets(&sheets, &file_name, &file_path, &settings),
            Err(e) => FileOutcome::Failed(e.to_string()),
        }
    });
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => FileOutcome::Failed(format!("extraction task failed: {}", e)),
    }
}

enum ChunkOutcome {
    Embedded(IndexedVector),
    Failed,
    Cancelled,
}

/// Embed chunks with bounded concurrency. Each call carries `timeout`.
async fn embed_chunks(
    embedder: &Arc<dyn Embedder>,
    chunks: &[Chunk],
    settings: &IndexSettings,
    cancel: &AtomicBool,
) -> (Vec<IndexedVector>, u64) {
    let semaphore = Semaphore::new(settings.embed_concurrency);
    let tasks = chunks.iter().map(|chunk| {
        let semaphore = &semaphore;
        async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return ChunkOutcome::Failed;
            };
            if cancel.load(Ordering::SeqCst) {
                return ChunkOutcome::Cancelled;
            }
            let result = match tokio::time::timeout(settings.embed_timeout, embedder.embed(&chunk.text)).await {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::Timeout(settings.embed_timeout.as_secs())),
            };
            match result {
                Ok(vector) => ChunkOutcome::Embedded(IndexedVector::from_chunk(chunk, vector)),
                Err(e) => {
                    warn!(chunk_id = %chunk.id, record_id = %chunk.record_id, "embedding failed: {}", e);
                    ChunkOutcome::Failed
                }
            }
        }
    });

    let mut vectors = Vec::with_capacity(chunks.len());
    let mut failed = 0u64;
    for outcome in futures::future::join_all(tasks).await {
        match outcome {
            ChunkOutcome::Embedded(v) => vectors.push(v),
            ChunkOutcome::Failed => failed += 1,
            ChunkOutcome::Cancelled => {}
        }
    }
    (vectors, failed)
}

/// Index every workbook under `root` into `collection`.
///
/// Returns `Err` only for whole-run failures: the root cannot be walked
/// or the vector store rejects a write.
pub async fn index_directory(
    root: &Path,
    sources: &SourcesConfig,
    settings: IndexSettings,
    embedder: Arc<dyn Embedder>,
    collection: Arc<dyn VectorCollection>,
    cancel: Arc<AtomicBool>,
    reporter: &dyn IndexProgressReporter,
) -> Result<IndexReport> {
    let started = Instant::now();
    let files = discover_workbooks(root, sources)?;
    let total = files.len() as u64;
    info!(root = %root.display(), files = total, "starting index run");
    reporter.report(IndexProgressEvent::Discovered { files: total });

    let mut report = IndexReport {
        root: root.display().to_string(),
        files_seen: total,
        ..IndexReport::default()
    };

    let settings = Arc::new(settings);
    let mut outcomes = stream::iter(files)
        .map(|path| {
            let settings = Arc::clone(&settings);
            let cancel = Arc::clone(&cancel);
            async move {
                let outcome = extract_file(path.clone(), settings, cancel).await;
                (path, outcome)
            }
        })
        .buffered(settings.file_concurrency);

    let mut n = 0u64;
    while let Some((path, outcome)) = outcomes.next().await {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }
        n += 1;
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let mut record_count = 0u64;
        match &outcome {
            FileOutcome::Extracted {
                records,
                rows_skipped,
            } => {
                record_count = records.len() as u64;
                report.records += record_count;
                report.rows_skipped += *rows_skipped as u64;
                report.files_indexed += 1;

                let chunks: Vec<Chunk> = records
                    .iter()
                    .flat_map(|r| chunk_record(r, &settings.chunking))
                    .collect();
                report.chunks += chunks.len() as u64;

                let (vectors, failed) = embed_chunks(&embedder, &chunks, &settings, &cancel).await;
                report.chunks_failed += failed;
                report.chunks_embedded += vectors.len() as u64;

                store_call(
                    collection.name(),
                    "add",
                    settings.store_timeout,
                    collection.add(&vectors),
                )
                .await
                .with_context(|| format!("Failed to store vectors for {}", file))?;
                report.vectors_written += vectors.len() as u64;
                reporter.report(IndexProgressEvent::Embedding {
                    n: report.chunks_embedded,
                    total: report.chunks,
                });
                info!(
                    file = %file,
                    records = record_count,
                    chunks = chunks.len(),
                    written = vectors.len(),
                    "indexed workbook"
                );
            }
            FileOutcome::Skipped => {
                report.files_skipped += 1;
                info!(file = %file, "no recognized sheets, skipping");
            }
            FileOutcome::NoHeader(e) => {
                report.files_no_header += 1;
                report.failures.push(FileFailure {
                    file: file.clone(),
                    reason: e.to_string(),
                });
            }
            FileOutcome::Failed(reason) => {
                report.files_failed += 1;
                warn!(file = %file, "failed to read workbook: {}", reason);
                report.failures.push(FileFailure {
                    file: file.clone(),
                    reason: reason.clone(),
                });
            }
            FileOutcome::Cancelled => {
                report.cancelled = true;
                break;
            }
        }

        reporter.report(IndexProgressEvent::FileDone {
            file,
            status: outcome.status(),
            records: record_count,
            n,
            total,
        });
    }

    if cancel.load(Ordering::SeqCst) {
        report.cancelled = true;
    }
    report.duration_ms = started.elapsed().as_millis() as u64;
    reporter.report(IndexProgressEvent::Finished {
        records: report.records,
        chunks: report.vectors_written,
    });
    info!(
        records = report.records,
        vectors = report.vectors_written,
        failed_files = report.files_failed + report.files_no_header,
        failed_chunks = report.chunks_failed,
        cancelled = report.cancelled,
        "index run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capability_lookup_core::table::RawTable;

    fn settings() -> IndexSettings {
        IndexSettings::from_config(&Config::default()).unwrap()
    }

    fn sheet(name: &str, rows: Vec<Vec<&str>>) -> Sheet {
        Sheet {
            name: name.to_string(),
            table: RawTable::from_rows(rows),
        }
    }

    fn capability_sheet() -> Sheet {
        sheet(
            "Capability List",
            vec![
                vec!["Wealth platform"],
                vec![],
                vec!["ID", "Capability", "Scope / Business Description", "System Changes"],
                vec!["1", "Customer Onboarding", "Digital onboarding journey", "CRM"],
                vec!["2", "nan", "orphan description", "-"],
                vec!["3", "KYC Verification", "Identity checks", "KYC engine"],
            ],
        )
    }

    #[test]
    fn discovery_filters_by_glob_and_skips_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.xlsx"), b"").unwrap();
        std::fs::write(dir.path().join("nested/b.xlsx"), b"").unwrap();
        std::fs::write(dir.path().join("~$a.xlsx"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = discover_workbooks(dir.path(), &SourcesConfig::default()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.xlsx", "nested/b.xlsx"]);
    }

    #[test]
    fn discovery_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(discover_workbooks(&missing, &SourcesConfig::default()).is_err());
    }

    #[test]
    fn recognized_sheets_are_extracted() {
        let sheets = vec![sheet("Notes", vec![vec!["free text"]]), capability_sheet()];
        match extract_sheets(&sheets, "wealth.xlsx", "/data/wealth.xlsx", &settings()) {
            FileOutcome::Extracted {
                records,
                rows_skipped,
            } => {
                let names: Vec<&str> = records.iter().map(|r| r.capability.as_str()).collect();
                assert_eq!(names, vec!["Customer Onboarding", "KYC Verification"]);
                assert_eq!(rows_skipped, 1);
                assert_eq!(records[0].source.file_name, "wealth.xlsx");
                assert_eq!(records[0].source.row_index, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_workbook_is_skipped() {
        let sheets = vec![sheet("Sheet1", vec![vec!["Capability"]])];
        assert!(matches!(
            extract_sheets(&sheets, "x.xlsx", "x.xlsx", &settings()),
            FileOutcome::Skipped
        ));
    }

    #[test]
    fn header_less_capability_sheet_is_no_header() {
        let sheets = vec![sheet(
            "Capability List",
            vec![vec!["just", "some"], vec!["filler", "rows"]],
        )];
        assert!(matches!(
            extract_sheets(&sheets, "x.xlsx", "x.xlsx", &settings()),
            FileOutcome::NoHeader(_)
        ));
    }
}
