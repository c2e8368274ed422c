//! Index progress reporting.
//!
//! Reports observable progress during `caplook index` so users see which
//! workbooks are being read, how many chunks are embedded, and when the
//! index is ready. Progress goes to **stderr** so stdout stays parseable.

use std::io::{IsTerminal, Write};

/// A single progress event emitted by the indexing pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProgressEvent {
    /// Source discovery finished.
    Discovered { files: u64 },
    /// A file was read and extracted (or skipped).
    FileDone {
        file: String,
        status: &'static str,
        records: u64,
        n: u64,
        total: u64,
    },
    /// Chunks embedded and stored so far.
    Embedding { n: u64, total: u64 },
    Finished { records: u64, chunks: u64 },
}

/// Reports index progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress: `index  file 3 / 12  wealth.xlsx  extracted (14 records)`.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovered { files } => {
                format!("index  discovered {} workbook(s)\n", format_number(*files))
            }
            IndexProgressEvent::FileDone {
                file,
                status,
                records,
                n,
                total,
            } => format!(
                "index  file {} / {}  {}  {} ({} records)\n",
                format_number(*n),
                format_number(*total),
                file,
                status,
                format_number(*records)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Finished { records, chunks } => format!(
                "index  done  {} records, {} chunks\n",
                format_number(*records),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Discovered { files } => serde_json::json!({
                "event": "progress",
                "phase": "discovered",
                "files": files
            }),
            IndexProgressEvent::FileDone {
                file,
                status,
                records,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "file",
                "file": file,
                "status": status,
                "records": records,
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Finished { records, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "records": records,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
