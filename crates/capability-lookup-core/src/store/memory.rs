//! In-memory [`VectorStore`] for tests and ephemeral runs.
//!
//! Collections are `BTreeMap`s behind `std::sync::RwLock`. Queries are a
//! brute-force scan over every stored vector.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{IndexedVector, SearchResult};

use super::{check_batch_dims, rank_results, DistanceMetric, VectorCollection, VectorStore};

/// In-memory store. Cloning shares the underlying collections.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Arc<InMemoryCollection>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<Arc<dyn VectorCollection>, IndexError> {
        let mut map = self
            .collections
            .write()
            .map_err(|e| IndexError::backend(name, "open", e))?;
        let coll = map
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryCollection::new(name, metric)));
        if coll.metric != metric {
            return Err(IndexError::MetricMismatch {
                collection: name.to_string(),
                operation: "open",
                existing: coll.metric.to_string(),
                requested: metric.to_string(),
            });
        }
        let coll: Arc<dyn VectorCollection> = coll.clone();
        Ok(coll)
    }
}

/// One in-memory collection.
pub struct InMemoryCollection {
    name: String,
    metric: DistanceMetric,
    items: RwLock<BTreeMap<String, IndexedVector>>,
}

impl InMemoryCollection {
    pub fn new(name: &str, metric: DistanceMetric) -> Self {
        Self {
            name: name.to_string(),
            metric,
            items: RwLock::new(BTreeMap::new()),
        }
    }

    fn stored_dims(items: &BTreeMap<String, IndexedVector>) -> Option<usize> {
        items.values().next().map(|v| v.vector.len())
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn add(&self, batch: &[IndexedVector]) -> Result<(), IndexError> {
        let mut items = self
            .items
            .write()
            .map_err(|e| IndexError::backend(&self.name, "add", e))?;
        // Validate the whole batch before touching anything.
        check_batch_dims(&self.name, Self::stored_dims(&items), batch)?;
        for item in batch {
            items.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let items = self
            .items
            .read()
            .map_err(|e| IndexError::backend(&self.name, "query", e))?;
        if let Some(d) = Self::stored_dims(&items) {
            if d != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    collection: self.name.clone(),
                    operation: "query",
                    expected: d,
                    actual: vector.len(),
                });
            }
        }
        let results = items
            .values()
            .map(|item| SearchResult {
                id: item.id.clone(),
                text: item.text.clone(),
                distance: self.metric.distance(vector, &item.vector),
                metadata: item.metadata.clone(),
            })
            .collect();
        Ok(rank_results(results, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let items = self
            .items
            .read()
            .map_err(|e| IndexError::backend(&self.name, "count", e))?;
        Ok(items.len())
    }

    async fn dims(&self) -> Result<Option<usize>, IndexError> {
        let items = self
            .items
            .read()
            .map_err(|e| IndexError::backend(&self.name, "dims", e))?;
        Ok(Self::stored_dims(&items))
    }
}
