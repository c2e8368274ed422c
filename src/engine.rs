//! The capability lookup engine.
//!
//! Owns the injected clients (embedder, generator, source reader, vector
//! collection) and the lifecycle state machine:
//!
//! ```text
//! Uninitialized ──index──▶ Indexing ──▶ Ready
//!                              ▲          │
//!                              └──index───┘
//! ```
//!
//! `search` is only valid in `Ready` and never changes state. An engine
//! opened over a collection that already holds vectors starts in `Ready`.

use std::fmt;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use capability_lookup_core::embedding::Embedder;
use capability_lookup_core::error::IndexError;
use capability_lookup_core::generation::TextGenerator;
use capability_lookup_core::store::{VectorCollection, VectorStore};
use capability_lookup_core::table::SourceReader;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::deadline::store_call;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::{index_directory, IndexReport, IndexSettings};
use crate::progress::IndexProgressReporter;
use crate::search::{AnalysisResult, RetrievalOrchestrator, SearchSettings};
use crate::sqlite_store::SqliteVectorStore;
use crate::stats::{self, CollectionStats};
use crate::workbook::XlsxReader;
use crate::{db, migrate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Indexing,
    Ready,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Indexing => "indexing",
            EngineState::Ready => "ready",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// `search` was called before an index run completed.
    #[error("engine is not ready for search (state: {state}); run `caplook index` first")]
    NotReady { state: EngineState },

    #[error("an index run is already in progress")]
    AlreadyIndexing,

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Explicit client set handed to [`Engine::with_components`].
pub struct Components {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn TextGenerator>,
    pub reader: Arc<dyn SourceReader>,
    pub collection: Arc<dyn VectorCollection>,
}

pub struct Engine {
    config: Config,
    embedder: Arc<dyn Embedder>,
    collection: Arc<dyn VectorCollection>,
    orchestrator: RetrievalOrchestrator,
    pool: Option<SqlitePool>,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Open the SQLite index named in `config` and build every client.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config.index.path)
            .await
            .with_context(|| format!("Failed to open index at {}", config.index.path.display()))?;
        migrate::run_migrations(&pool).await?;

        let store = SqliteVectorStore::new(pool.clone());
        let collection = store
            .get_or_create_collection(&config.index.collection, config.index.metric)
            .await?;
        let components = Components {
            embedder: create_embedder(&config.embedding)?,
            generator: create_generator(&config.generation)?,
            reader: Arc::new(XlsxReader),
            collection,
        };

        let mut engine = Self::with_components(config, components).await?;
        engine.pool = Some(pool);
        Ok(engine)
    }

    /// Build an engine from already-constructed clients.
    pub async fn with_components(config: Config, components: Components) -> Result<Self, EngineError> {
        let existing = store_call(
            components.collection.name(),
            "count",
            config.index.store_timeout(),
            components.collection.count(),
        )
        .await?;
        let state = if existing > 0 {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        };
        info!(
            collection = components.collection.name(),
            vectors = existing,
            state = %state,
            "engine opened"
        );

        let settings = SearchSettings::from_config(&config);
        let orchestrator = RetrievalOrchestrator::new(
            Arc::clone(&components.embedder),
            Arc::clone(&components.collection),
            components.generator,
            components.reader,
            settings,
        );
        Ok(Self {
            config,
            embedder: components.embedder,
            collection: components.collection,
            orchestrator,
            pool: None,
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.lock_state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collection(&self) -> &Arc<dyn VectorCollection> {
        &self.collection
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Index every workbook under `root` (or `sources.root`).
    ///
    /// On success the engine is `Ready`. On failure, or when the future is
    /// dropped mid-run, it returns to the state it was in before the run.
    pub async fn index(
        &self,
        root: Option<&Path>,
        cancel: Arc<AtomicBool>,
        reporter: &dyn IndexProgressReporter,
    ) -> Result<IndexReport> {
        let previous = {
            let mut state = self.lock_state();
            if *state == EngineState::Indexing {
                return Err(EngineError::AlreadyIndexing.into());
            }
            std::mem::replace(&mut *state, EngineState::Indexing)
        };
        let mut guard = IndexingGuard {
            state: &self.state,
            restore: previous,
        };

        let root = root.unwrap_or(self.config.sources.root.as_path());
        let result = async {
            let settings = IndexSettings::from_config(&self.config)?;
            index_directory(
                root,
                &self.config.sources,
                settings,
                Arc::clone(&self.embedder),
                Arc::clone(&self.collection),
                cancel,
                reporter,
            )
            .await
        }
        .await;

        if result.is_ok() {
            guard.restore = EngineState::Ready;
        }
        drop(guard);
        result
    }

    /// Run a search. Fails only when the engine is not `Ready`.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<AnalysisResult, EngineError> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::NotReady { state });
        }
        let k = top_k.unwrap_or(self.config.retrieval.top_k).max(1);
        Ok(self.orchestrator.search(query, k).await)
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        stats::collect(self.collection.as_ref(), self.pool.as_ref(), &self.config.index.path).await
    }

    /// Close the underlying database pool, if any.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

/// Leaves `Indexing` when an index run ends, however it ends.
struct IndexingGuard<'a> {
    state: &'a Mutex<EngineState>,
    restore: EngineState,
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == EngineState::Indexing {
            *state = self.restore;
        }
    }
}
