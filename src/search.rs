//! Retrieval orchestrator.
//!
//! `search(query, top_k)`:
//!
//! 1. embed the query and take the `top_k` nearest chunks;
//! 2. with zero hits, return [`SearchStatus::NoMatches`];
//! 3. otherwise build one context block (optionally adding the best
//!    match's full source sheet) and run the four analyses of
//!    [`AnalysisKind`] concurrently, each under its own timeout.
//!
//! The call is fail-soft. A failed analysis is replaced by its placeholder
//! and listed in `failed_analyses`; a failed embedding or index query
//! yields [`SearchStatus::RetrievalFailed`] with the error message.

use std::sync::Arc;
use std::time::Duration;

use capability_lookup_core::embedding::Embedder;
use capability_lookup_core::error::{EmbeddingError, GenerationError};
use capability_lookup_core::generation::{GenerationRequest, TextGenerator};
use capability_lookup_core::models::SearchResult;
use capability_lookup_core::store::VectorCollection;
use capability_lookup_core::table::SourceReader;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analysis::{build_context, build_prompt, excerpt, AnalysisKind};
use crate::config::Config;
use crate::deadline::store_call;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Matched,
    NoMatches,
    RetrievalFailed,
}

/// Public shape of one retrieved chunk.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchView {
    pub capability: String,
    pub file_name: String,
    pub sheet_name: String,
    pub source_link: String,
    pub relevance: f64,
    pub distance: f64,
    pub excerpt: String,
}

impl MatchView {
    fn from_result(result: &SearchResult, excerpt_chars: usize) -> Self {
        let get = |key: &str| result.meta(key).unwrap_or("Unknown").to_string();
        Self {
            capability: get("capability"),
            file_name: get("file_name"),
            sheet_name: get("sheet_name"),
            source_link: result.meta("source_link").unwrap_or_default().to_string(),
            relevance: result.relevance(),
            distance: result.distance,
            excerpt: excerpt(&result.text, excerpt_chars),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub query: String,
    pub status: SearchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
    pub cost_analysis: String,
    pub team_analysis: String,
    pub system_impact: String,
    pub matches: Vec<MatchView>,
    pub total_found: usize,
    pub failed_analyses: Vec<AnalysisKind>,
    pub searched_at: DateTime<Utc>,
}

impl AnalysisResult {
    fn empty(query: &str, status: SearchStatus, message: String) -> Self {
        let error = match status {
            SearchStatus::RetrievalFailed => Some(message.clone()),
            _ => None,
        };
        Self {
            query: query.to_string(),
            status,
            error,
            summary: message,
            cost_analysis: String::new(),
            team_analysis: String::new(),
            system_impact: String::new(),
            matches: Vec::new(),
            total_found: 0,
            failed_analyses: Vec::new(),
            searched_at: Utc::now(),
        }
    }

    pub fn analysis(&self, kind: AnalysisKind) -> &str {
        match kind {
            AnalysisKind::Summary => &self.summary,
            AnalysisKind::Cost => &self.cost_analysis,
            AnalysisKind::Team => &self.team_analysis,
            AnalysisKind::SystemImpact => &self.system_impact,
        }
    }
}

/// Settings for one orchestrator, resolved from config.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub excerpt_chars: usize,
    pub deep_context: bool,
    pub deep_context_chars: usize,
    pub context_matches: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub concurrency: usize,
    /// Deadlines cover every provider retry; the store has no retries.
    pub embed_timeout: Duration,
    pub generation_timeout: Duration,
    pub store_timeout: Duration,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Self {
        let retrieval = &config.retrieval;
        let generation = &config.generation;
        Self {
            excerpt_chars: retrieval.excerpt_chars,
            deep_context: retrieval.deep_context,
            deep_context_chars: retrieval.deep_context_chars,
            context_matches: retrieval.context_matches,
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
            concurrency: generation.concurrency.max(1),
            embed_timeout: config.embedding.call_deadline(),
            generation_timeout: generation.call_deadline(),
            store_timeout: config.index.store_timeout(),
        }
    }
}

pub struct RetrievalOrchestrator {
    embedder: Arc<dyn Embedder>,
    collection: Arc<dyn VectorCollection>,
    generator: Arc<dyn TextGenerator>,
    reader: Arc<dyn SourceReader>,
    settings: SearchSettings,
}

impl RetrievalOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        collection: Arc<dyn VectorCollection>,
        generator: Arc<dyn TextGenerator>,
        reader: Arc<dyn SourceReader>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            embedder,
            collection,
            generator,
            reader,
            settings,
        }
    }

    pub async fn search(&self, query: &str, top_k: usize) -> AnalysisResult {
        info!(query = %query, top_k, "search");

        let vector = match tokio::time::timeout(self.settings.embed_timeout, self.embedder.embed(query)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return self.retrieval_failed(query, e.to_string()),
            Err(_) => {
                let e = EmbeddingError::Timeout(self.settings.embed_timeout.as_secs());
                return self.retrieval_failed(query, e.to_string());
            }
        };

        let matches = match store_call(
            self.collection.name(),
            "query",
            self.settings.store_timeout,
            self.collection.query(&vector, top_k),
        )
        .await
        {
            Ok(m) => m,
            Err(e) => return self.retrieval_failed(query, e.to_string()),
        };

        if matches.is_empty() {
            info!(query = %query, "no matches");
            return AnalysisResult::empty(
                query,
                SearchStatus::NoMatches,
                "No matching capabilities found for the given query.".to_string(),
            );
        }

        let deep = self.deep_context(&matches[0]).await;
        let context = build_context(&matches, self.settings.context_matches, deep.as_deref());
        let outcomes = self.run_analyses(query, &context).await;

        let mut result = AnalysisResult {
            query: query.to_string(),
            status: SearchStatus::Matched,
            error: None,
            summary: String::new(),
            cost_analysis: String::new(),
            team_analysis: String::new(),
            system_impact: String::new(),
            matches: matches
                .iter()
                .map(|m| MatchView::from_result(m, self.settings.excerpt_chars))
                .collect(),
            total_found: matches.len(),
            failed_analyses: Vec::new(),
            searched_at: Utc::now(),
        };

        for (kind, outcome) in outcomes {
            let text = match outcome {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!(analysis = kind.label(), "{}", e);
                    result.failed_analyses.push(kind);
                    kind.placeholder(&e.to_string())
                }
            };
            match kind {
                AnalysisKind::Summary => result.summary = text,
                AnalysisKind::Cost => result.cost_analysis = text,
                AnalysisKind::Team => result.team_analysis = text,
                AnalysisKind::SystemImpact => result.system_impact = text,
            }
        }
        result
    }

    fn retrieval_failed(&self, query: &str, message: String) -> AnalysisResult {
        warn!(query = %query, "retrieval failed: {}", message);
        AnalysisResult::empty(query, SearchStatus::RetrievalFailed, message)
    }

    /// Full sheet of the best match, if enabled and readable.
    async fn deep_context(&self, best: &SearchResult) -> Option<String> {
        if !self.settings.deep_context {
            return None;
        }
        let file_path = best.meta("file_path")?;
        let sheet_name = best.meta("sheet_name")?;
        match self.reader.read_sheet(file_path, sheet_name).await {
            Ok(table) => Some(table.to_text(self.settings.deep_context_chars)),
            Err(e) => {
                debug!(file = %file_path, sheet = %sheet_name, "deep context unavailable: {:#}", e);
                None
            }
        }
    }

    async fn run_analyses(
        &self,
        query: &str,
        context: &str,
    ) -> Vec<(AnalysisKind, Result<String, GenerationError>)> {
        let semaphore = Semaphore::new(self.settings.concurrency);
        let tasks = AnalysisKind::ALL.into_iter().map(|kind| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (kind, Err(GenerationError::Request("analysis pool closed".into())));
                };
                let request = GenerationRequest::new(build_prompt(kind, query, context))
                    .with_system(kind.system_instruction())
                    .with_limits(self.settings.max_tokens, self.settings.temperature);
                let outcome =
                    match tokio::time::timeout(self.settings.generation_timeout, self.generator.generate(&request)).await {
                        Ok(r) => r,
                        Err(_) => Err(GenerationError::Timeout(self.settings.generation_timeout.as_secs())),
                    };
                (kind, outcome)
            }
        });
        futures::future::join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capability_lookup_core::embedding::HashEmbedder;
    use capability_lookup_core::error::IndexError;
    use capability_lookup_core::models::{IndexedVector, Metadata};
    use capability_lookup_core::store::memory::InMemoryCollection;
    use capability_lookup_core::store::DistanceMetric;
    use capability_lookup_core::table::RawTable;

    struct ScriptedGenerator {
        fail: Option<AnalysisKind>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            let system = request.system.as_deref().unwrap_or_default();
            let kind = AnalysisKind::ALL
                .into_iter()
                .find(|k| k.system_instruction() == system)
                .ok_or_else(|| GenerationError::InvalidResponse("unknown analysis".into()))?;
            if Some(kind) == self.fail {
                return Err(GenerationError::Request("HTTP 500".into()));
            }
            Ok(format!("  {} text  ", kind.label()))
        }
    }

    struct NoSource;

    #[async_trait]
    impl SourceReader for NoSource {
        async fn read_sheet(&self, file_path: &str, _sheet: &str) -> anyhow::Result<RawTable> {
            anyhow::bail!("{} not available", file_path)
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings::from_config(&Config::default())
    }

    /// Accepts the call and never answers.
    struct StalledCollection;

    #[async_trait]
    impl VectorCollection for StalledCollection {
        fn name(&self) -> &str {
            "stalled"
        }
        fn metric(&self) -> DistanceMetric {
            DistanceMetric::Cosine
        }
        async fn add(&self, _items: &[IndexedVector]) -> Result<(), IndexError> {
            futures::future::pending().await
        }
        async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<SearchResult>, IndexError> {
            futures::future::pending().await
        }
        async fn count(&self) -> Result<usize, IndexError> {
            Ok(1)
        }
        async fn dims(&self) -> Result<Option<usize>, IndexError> {
            Ok(None)
        }
    }

    async fn collection(embedder: &HashEmbedder, names: &[&str]) -> Arc<dyn VectorCollection> {
        let coll = InMemoryCollection::new("test", DistanceMetric::Cosine);
        let items: Vec<IndexedVector> = names
            .iter()
            .map(|name| {
                let text = format!("Capability: {}", name);
                let mut metadata = Metadata::new();
                metadata.insert("capability".into(), name.to_string());
                metadata.insert("file_name".into(), "wealth.xlsx".into());
                metadata.insert("file_path".into(), "/missing/wealth.xlsx".into());
                metadata.insert("sheet_name".into(), "Capability List".into());
                IndexedVector {
                    id: name.to_lowercase(),
                    vector: embedder.embed_sync(&text),
                    text,
                    metadata,
                }
            })
            .collect();
        coll.add(&items).await.unwrap();
        Arc::new(coll)
    }

    fn orchestrator(
        coll: Arc<dyn VectorCollection>,
        fail: Option<AnalysisKind>,
    ) -> RetrievalOrchestrator {
        RetrievalOrchestrator::new(
            Arc::new(HashEmbedder::new(512)),
            coll,
            Arc::new(ScriptedGenerator { fail }),
            Arc::new(NoSource),
            settings(),
        )
    }

    #[tokio::test]
    async fn one_failed_analysis_keeps_the_others() {
        let embedder = HashEmbedder::new(512);
        let coll = collection(
            &embedder,
            &["Customer Onboarding", "KYC Verification", "Mutual Fund Selection"],
        )
        .await;
        let result = orchestrator(coll, Some(AnalysisKind::Team))
            .search("mutual funds", 3)
            .await;

        assert_eq!(result.status, SearchStatus::Matched);
        assert_eq!(result.summary, "Summary text");
        assert_eq!(result.cost_analysis, "Cost analysis text");
        assert_eq!(result.system_impact, "System impact analysis text");
        assert!(result.team_analysis.starts_with("Team analysis unavailable:"));
        assert_eq!(result.failed_analyses, vec![AnalysisKind::Team]);
        assert_eq!(result.matches[0].capability, "Mutual Fund Selection");
        assert_eq!(result.total_found, 3);
    }

    #[tokio::test]
    async fn empty_collection_reports_no_matches() {
        let embedder = HashEmbedder::new(512);
        let coll = collection(&embedder, &[]).await;
        let result = orchestrator(coll, None).search("anything", 5).await;
        assert_eq!(result.status, SearchStatus::NoMatches);
        assert!(result.matches.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn stalled_query_times_out_as_retrieval_failure() {
        let mut settings = settings();
        settings.store_timeout = Duration::from_millis(50);
        let orchestrator = RetrievalOrchestrator::new(
            Arc::new(HashEmbedder::new(512)),
            Arc::new(StalledCollection),
            Arc::new(ScriptedGenerator { fail: None }),
            Arc::new(NoSource),
            settings,
        );
        let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.search("kyc", 3))
            .await
            .expect("search must not hang on the store");
        assert_eq!(result.status, SearchStatus::RetrievalFailed);
        let error = result.error.unwrap();
        assert!(error.contains("stalled"), "{}", error);
        assert!(error.contains("query timed out"), "{}", error);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_retrieval_failure() {
        let coll = collection(&HashEmbedder::new(8), &["KYC Verification"]).await;
        let result = orchestrator(coll, None).search("kyc", 5).await;
        assert_eq!(result.status, SearchStatus::RetrievalFailed);
        assert!(result.error.is_some());
    }
}
