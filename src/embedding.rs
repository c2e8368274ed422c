//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: `POST /v1/embeddings` with retry and backoff.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashEmbedder`]**: offline feature hashing, from the core crate.
//! - **`LocalEmbedder`**: fastembed models run in-process (feature `local-embeddings-fastembed`).
//!
//! Every provider checks that returned vectors have the configured
//! dimensionality.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use capability_lookup::config::EmbeddingConfig;
//! # use capability_lookup::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use capability_lookup_core::embedding::{check_dims, Embedder, HashEmbedder};
use capability_lookup_core::error::EmbeddingError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::config::EmbeddingConfig;
use crate::http::{build_client, post_json, HttpFailure, RetryPolicy};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 512;

fn to_embedding_error(e: HttpFailure, timeout_secs: u64) -> EmbeddingError {
    match e {
        HttpFailure::Timeout => EmbeddingError::Timeout(timeout_secs),
        HttpFailure::Decode(msg) => EmbeddingError::InvalidResponse(msg),
        other => EmbeddingError::Request(other.to_string()),
    }
}

fn parse_vector(value: Option<&serde_json::Value>) -> Result<Vec<f32>, EmbeddingError> {
    value
        .and_then(|v| v.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::InvalidResponse("non-numeric component".to_string()))
        })
        .collect()
}

// ============ Disabled ============

/// Embedder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder {
    dims: usize,
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ OpenAI ============

/// OpenAI embeddings API (or any compatible endpoint via `embedding.url`).
///
/// Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            model,
            dims,
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key.trim()))
            .map_err(|e| EmbeddingError::Request(format!("invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let url = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let json = post_json(&self.client, &url, headers, &body, self.retry)
            .await
            .map_err(|e| to_embedding_error(e, self.timeout_secs))?;
        let first = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".to_string()))?;
        check_dims(parse_vector(first.get("embedding"))?, self.dims)
    }
}

// ============ Ollama ============

/// A local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model,
            dims,
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_json(&self.client, &url, HeaderMap::new(), &body, self.retry)
            .await
            .map_err(|e| match e {
                HttpFailure::Network(msg) => EmbeddingError::Request(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, msg
                )),
                other => to_embedding_error(other, self.timeout_secs),
            })?;
        let first = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first());
        check_dims(parse_vector(first)?, self.dims)
    }
}

// ============ Local (fastembed) ============

/// In-process fastembed model. Downloaded on first use, then offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model_id, default_dims) = match model_name.as_str() {
            "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
            "bge-large-en-v1.5" => (fastembed::EmbeddingModel::BGELargeENV15, 1024),
            "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5",
                other
            ),
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model_id).with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.model.clone();
        let text = text.to_string();
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| EmbeddingError::Request(e.to_string()))?;
            guard
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Request(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbeddingError::Request(e.to_string()))??;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding batch".to_string()))?;
        check_dims(vector, self.dims)
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder {
            dims: config.dims.unwrap_or(0),
        })),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_config(url: &str, dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(dims),
            url: Some(url.to_string()),
            max_retries: 0,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_embedder_refuses() {
        let e = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(e.embed("x").await, Err(EmbeddingError::Disabled));
    }

    #[tokio::test]
    async fn hash_provider_uses_configured_dims() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(64),
            ..EmbeddingConfig::default()
        };
        let e = create_embedder(&config).unwrap();
        assert_eq!(e.dims(), 64);
        assert_eq!(e.embed("kyc").await.unwrap().len(), 64);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "titan".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn openai_embedder_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let e = OpenAiEmbedder::with_api_key(&openai_config(&server.uri(), 3), "test-key".into())
            .unwrap();
        let v = e.embed("mutual funds").await.unwrap();
        assert_eq!(v.len(), 3);
        assert!((v[1] - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn openai_embedder_rejects_wrong_dims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2]}]
            })))
            .mount(&server)
            .await;

        let e = OpenAiEmbedder::with_api_key(&openai_config(&server.uri(), 3), "k".into()).unwrap();
        assert_eq!(
            e.embed("x").await,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let e = OpenAiEmbedder::with_api_key(&openai_config(&server.uri(), 3), "k".into())
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries: 3,
                base_delay: std::time::Duration::from_millis(1),
            });
        let err = e.embed("x").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Request(msg) if msg.contains("400")));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let e = OpenAiEmbedder::with_api_key(&openai_config(&server.uri(), 3), "k".into())
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries: 2,
                base_delay: std::time::Duration::from_millis(1),
            });
        assert!(e.embed("x").await.is_err());
    }

    #[tokio::test]
    async fn ollama_embedder_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            url: Some(server.uri()),
            ..EmbeddingConfig::default()
        };
        let e = OllamaEmbedder::new(&config).unwrap();
        assert_eq!(e.embed("x").await.unwrap(), vec![1.0, 0.0]);
    }
}
