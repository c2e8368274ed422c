//! TOML configuration.
//!
//! Every section is optional; omitted keys take the defaults below. The
//! file lives at `./config/caplook.toml` unless `--config` says otherwise.
//!
//! ```toml
//! [index]
//! path = "./data/caplook.sqlite"
//! collection = "capability_chunks"
//!
//! [sources]
//! root = "./Sample Estimations"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "anthropic"
//! model = "claude-3-5-haiku-latest"
//! ```
//!
//! API keys are never read from the file: `OPENAI_API_KEY` and
//! `ANTHROPIC_API_KEY` come from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use capability_lookup_core::chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use capability_lookup_core::schema::{DEFAULT_ESTIMATION_SCAN_WINDOW, DEFAULT_SCAN_WINDOW};
use capability_lookup_core::store::DistanceMetric;
use serde::Deserialize;

use crate::http::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "./config/caplook.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub metric: DistanceMetric,
    /// Deadline for one vector store call (`add`, `query`, `count`).
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
            metric: DistanceMetric::Cosine,
            timeout_secs: default_index_timeout(),
        }
    }
}

impl IndexConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_index_timeout() -> u64 {
    30
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/caplook.sqlite")
}
fn default_collection() -> String {
    "capability_chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./Sample Estimations")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.xlsx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    #[serde(default = "default_scan_window")]
    pub scan_window: usize,
    #[serde(default = "default_estimation_scan_window")]
    pub estimation_scan_window: usize,
    /// Canonical column name → additional synonyms.
    #[serde(default)]
    pub extra_synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            estimation_scan_window: DEFAULT_ESTIMATION_SCAN_WINDOW,
            extra_synonyms: BTreeMap::new(),
        }
    }
}

fn default_scan_window() -> usize {
    DEFAULT_SCAN_WINDOW
}
fn default_estimation_scan_window() -> usize {
    DEFAULT_ESTIMATION_SCAN_WINDOW
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            concurrency: default_embedding_concurrency(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Outer deadline for one embed call, covering every retry.
    pub fn call_deadline(&self) -> Duration {
        RetryPolicy::new(self.max_retries).budget(Duration::from_secs(self.timeout_secs))
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_embedding_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_concurrency")]
    pub concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            concurrency: default_generation_concurrency(),
        }
    }
}

impl GenerationConfig {
    /// Outer deadline for one generate call, covering every retry.
    pub fn call_deadline(&self) -> Duration {
        RetryPolicy::new(self.max_retries).budget(Duration::from_secs(self.timeout_secs))
    }
}

fn default_max_tokens() -> u32 {
    400
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_concurrency() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    /// Re-read the best match's sheet for extra context.
    #[serde(default = "default_true")]
    pub deep_context: bool,
    #[serde(default = "default_deep_context_chars")]
    pub deep_context_chars: usize,
    /// How many matches are folded into the shared context block.
    #[serde(default = "default_context_matches")]
    pub context_matches: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            excerpt_chars: default_excerpt_chars(),
            deep_context: true,
            deep_context_chars: default_deep_context_chars(),
            context_matches: default_context_matches(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_excerpt_chars() -> usize {
    200
}
fn default_true() -> bool {
    true
}
fn default_deep_context_chars() -> usize {
    4000
}
fn default_context_matches() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            file_concurrency: default_file_concurrency(),
        }
    }
}

fn default_file_concurrency() -> usize {
    4
}

impl Config {
    /// Defaults with the hash embedder and the index under `dir`; used by tests.
    pub fn minimal(dir: &Path) -> Self {
        let mut config = Config::default();
        config.index.path = dir.join("caplook.sqlite");
        config.sources.root = dir.to_path_buf();
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = Some(512);
        config
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        let config = Config::default();
        validate(&config)?;
        Ok(config)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }
    if config.schema.scan_window == 0 {
        bail!("schema.scan_window must be > 0");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.indexing.file_concurrency == 0
        || config.embedding.concurrency == 0
        || config.generation.concurrency == 0
    {
        bail!("concurrency settings must be >= 1");
    }
    if config.index.timeout_secs == 0
        || config.embedding.timeout_secs == 0
        || config.generation.timeout_secs == 0
    {
        bail!("timeout_secs settings must be >= 1");
    }
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "hash" | "local" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "anthropic" | "openai" | "ollama" => {
            if config.generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, anthropic, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.index.collection, "capability_chunks");
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.schema.scan_window, 10);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.index.metric, DistanceMetric::Cosine);
    }

    #[test]
    fn call_deadlines_cover_retries() {
        let config: Config = toml::from_str(
            "[index]\ntimeout_secs = 7\n\n[embedding]\ntimeout_secs = 10\nmax_retries = 1\n",
        )
        .unwrap();
        assert_eq!(config.index.store_timeout(), Duration::from_secs(7));
        assert_eq!(config.embedding.call_deadline(), Duration::from_secs(21));
        assert!(config.generation.call_deadline() > Duration::from_secs(config.generation.timeout_secs));
    }

    #[test]
    fn zero_store_timeout_rejected() {
        let config: Config = toml::from_str("[index]\ntimeout_secs = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let config: Config = toml::from_str("[chunking]\nchunk_size = 10\noverlap = 10\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn openai_requires_model_and_dims() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_generation_provider_rejected() {
        let config: Config = toml::from_str("[generation]\nprovider = \"bedrock\"\n").unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("bedrock"));
    }

    #[test]
    fn metric_and_synonyms_parse() {
        let config: Config = toml::from_str(
            "[index]\nmetric = \"l2\"\n\n[schema.extra_synonyms]\nCapability = [\"Epic\"]\n",
        )
        .unwrap();
        assert_eq!(config.index.metric, DistanceMetric::L2);
        assert_eq!(
            config.schema.extra_synonyms.get("Capability"),
            Some(&vec!["Epic".to_string()])
        );
    }
}
