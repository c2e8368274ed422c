//! Vector store abstraction.
//!
//! A [`VectorStore`] hands out named [`VectorCollection`]s. Collections
//! hold [`IndexedVector`]s keyed by id and answer nearest-neighbor
//! queries.
//!
//! # Contract
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | [`get_or_create_collection`](VectorStore::get_or_create_collection) | Idempotent; creates on first call |
//! | [`add`](VectorCollection::add) | Upsert by id (last write wins) |
//! | [`query`](VectorCollection::query) | Ascending by distance, ties by id |
//! | [`count`](VectorCollection::count) | Number of stored vectors |
//!
//! A collection's metric is fixed at creation. Reopening it with another
//! metric, or adding a vector whose length differs from the stored ones,
//! is an [`IndexError`].
//!
//! Implementations must be `Send + Sync`. The in-memory store lives in
//! [`memory`]; the SQLite store lives in the app crate.

pub mod memory;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, l2_distance};
use crate::error::IndexError;
use crate::models::{IndexedVector, SearchResult};

/// Distance function of a collection. Smaller is closer for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 − cosine similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Some(DistanceMetric::Cosine),
            "l2" | "euclidean" => Some(DistanceMetric::L2),
            _ => None,
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b) as f64,
            DistanceMetric::L2 => l2_distance(a, b) as f64,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hands out named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn get_or_create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<Arc<dyn VectorCollection>, IndexError>;
}

/// One named set of vectors.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;
    fn metric(&self) -> DistanceMetric;

    /// Upsert every item. Duplicate ids overwrite.
    async fn add(&self, items: &[IndexedVector]) -> Result<(), IndexError>;

    /// The `k` nearest vectors, ascending by distance.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Dimensionality of stored vectors, or `None` while empty.
    async fn dims(&self) -> Result<Option<usize>, IndexError>;
}

/// Order results ascending by distance, ties by id, and keep the first `k`.
pub fn rank_results(mut results: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(k);
    results
}

/// Check that every item has the same length as `existing` (or as each other when empty).
pub fn check_batch_dims(
    collection: &str,
    existing: Option<usize>,
    items: &[IndexedVector],
) -> Result<Option<usize>, IndexError> {
    let mut expected = existing;
    for item in items {
        match expected {
            Some(d) if d != item.vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    collection: collection.to_string(),
                    operation: "add",
                    expected: d,
                    actual: item.vector.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(item.vector.len()),
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn result(id: &str, distance: f64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            text: String::new(),
            distance,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn rank_sorts_ascending_with_id_tiebreak() {
        let ranked = rank_results(
            vec![result("c", 0.5), result("b", 0.1), result("a", 0.5)],
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(rank_results(ranked, 1).len(), 1);
    }

    #[test]
    fn metric_parse_and_distance() {
        assert_eq!(DistanceMetric::parse("Cosine"), Some(DistanceMetric::Cosine));
        assert_eq!(DistanceMetric::parse("l2"), Some(DistanceMetric::L2));
        assert_eq!(DistanceMetric::parse("dot"), None);
        let d = DistanceMetric::Cosine.distance(&[1.0, 0.0], &[1.0, 0.0]);
        assert!(d.abs() < 1e-6);
    }
}
