//! Overlapping word-window chunker.
//!
//! Splits a record's rendered text into [`Chunk`]s of at most
//! `chunk_size` words, where consecutive chunks share exactly `overlap`
//! words.
//!
//! # Algorithm
//!
//! 1. Tokenize the text into whitespace-separated words.
//! 2. Window `k` starts at word `k × (chunk_size − overlap)` and covers
//!    `chunk_size` words (fewer for the last window).
//! 3. Stop after the first window that reaches the final word.
//!
//! Chunk text is sliced from the original string, so line breaks between
//! labeled fields survive inside a chunk. Empty text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use capability_lookup_core::chunk::{chunk_text, ChunkConfig};
//!
//! let cfg = ChunkConfig::new(3, 1).unwrap();
//! let windows = chunk_text("a b c d e", &cfg);
//! assert_eq!(windows, vec!["a b c", "c d e"]);
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{CapabilityRecord, Chunk};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

/// Window size and overlap, both in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if overlap >= chunk_size {
            bail!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Byte spans of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, idx));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split `text` into overlapping word windows.
pub fn chunk_text<'a>(text: &'a str, config: &ChunkConfig) -> Vec<&'a str> {
    let spans = word_spans(text);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < spans.len() {
        let end = (start + config.chunk_size).min(spans.len());
        windows.push(&text[spans[start].0..spans[end - 1].1]);
        if end == spans.len() {
            break;
        }
        start += config.step();
    }
    windows
}

/// Chunk a record's rendered text.
///
/// Chunk ids are UUID v5 over `"{record_id}#{index}"`, so re-indexing the
/// same record overwrites its chunks in place.
pub fn chunk_record(record: &CapabilityRecord, config: &ChunkConfig) -> Vec<Chunk> {
    let text = record.render_text();
    let metadata = record.metadata();
    chunk_text(&text, config)
        .into_iter()
        .enumerate()
        .map(|(index, window)| Chunk {
            id: chunk_id(&record.id, index),
            record_id: record.id.clone(),
            chunk_index: index,
            text: window.to_string(),
            hash: content_hash(window),
            metadata: metadata.clone(),
        })
        .collect()
}

pub fn chunk_id(record_id: &str, index: usize) -> String {
    let name = format!("{}#{}", record_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
