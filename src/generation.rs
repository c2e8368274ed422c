//! Text-generation providers.
//!
//! - **[`DisabledGenerator`]**: always fails, so every analysis falls back to its placeholder.
//! - **[`AnthropicGenerator`]**: the Messages API (`x-api-key`, `anthropic-version: 2023-06-01`).
//! - **[`OpenAiGenerator`]**: `POST /v1/chat/completions`.
//! - **[`OllamaGenerator`]**: `POST /api/chat` with `stream: false`.
//!
//! All HTTP providers share the retry policy in [`crate::http`]. An empty
//! completion is returned as `Ok("")`.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use capability_lookup_core::error::GenerationError;
use capability_lookup_core::generation::{GenerationRequest, TextGenerator};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::http::{build_client, post_json, HttpFailure, RetryPolicy};

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

fn to_generation_error(e: HttpFailure, timeout_secs: u64) -> GenerationError {
    match e {
        HttpFailure::Timeout => GenerationError::Timeout(timeout_secs),
        HttpFailure::Decode(msg) => GenerationError::InvalidResponse(msg),
        other => GenerationError::Request(other.to_string()),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(json: serde_json::Value) -> Result<T, GenerationError> {
    serde_json::from_value(json).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
}

fn encode<T: Serialize>(body: &T) -> Result<serde_json::Value, GenerationError> {
    serde_json::to_value(body).map_err(|e| GenerationError::Request(e.to_string()))
}

/// Settings shared by every HTTP generator.
struct HttpSettings {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl HttpSettings {
    fn new(config: &GenerationConfig, default_url: &str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("generation.model required for provider '{}'", config.provider)
        })?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    async fn post(
        &self,
        endpoint: &str,
        headers: HeaderMap,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GenerationError> {
        let url = format!("{}{}", self.url, endpoint);
        post_json(&self.client, &url, headers, &body, self.retry)
            .await
            .map_err(|e| to_generation_error(e, self.timeout_secs))
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ Anthropic ============

/// Anthropic Messages API. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicGenerator {
    http: HttpSettings,
    api_key: String,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config, DEFAULT_ANTHROPIC_URL)?,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim())
                .map_err(|e| GenerationError::Request(format!("invalid Anthropic API key: {}", e)))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        let body = encode(&AnthropicRequest {
            model: &self.http.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.as_deref(),
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        })?;
        let parsed: AnthropicResponse = decode(self.http.post("/v1/messages", headers, body).await?)?;
        Ok(parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ============ OpenAI ============

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    http: HttpSettings,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            http: HttpSettings::new(config, DEFAULT_OPENAI_URL)?,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

fn chat_messages(request: &GenerationRequest) -> Vec<ChatMessage<'_>> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });
    messages
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key.trim()))
                .map_err(|e| GenerationError::Request(format!("invalid OpenAI API key: {}", e)))?,
        );
        let body = encode(&ChatRequest {
            model: &self.http.model,
            messages: chat_messages(request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            stream: None,
            options: None,
        })?;
        let parsed: OpenAiResponse =
            decode(self.http.post("/chat/completions", headers, body).await?)?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    http: HttpSettings,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config, DEFAULT_OLLAMA_URL)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OpenAiMessage>,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = encode(&ChatRequest {
            model: &self.http.model,
            messages: chat_messages(request),
            max_tokens: None,
            temperature: None,
            stream: Some(false),
            options: Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }),
        })?;
        let parsed: OllamaResponse = decode(self.http.post("/api/chat", HeaderMap::new(), body).await?)?;
        Ok(parsed
            .message
            .and_then(|m| m.content)
            .unwrap_or_default())
    }
}

/// Create the [`TextGenerator`] named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
