//! Text-generation trait.
//!
//! Concrete providers (Anthropic, OpenAI, Ollama) live in the app crate.
//! The retrieval orchestrator depends only on [`TextGenerator`].

use async_trait::async_trait;

use crate::error::GenerationError;

/// A single generation call: a system instruction plus a user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 400,
            temperature: 0.1,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// Produces text from a prompt. An empty completion is `Ok("")`, not an error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
