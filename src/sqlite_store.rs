//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in the `vectors` table
//! (see [`crate::migrate`]) and queried by a brute-force scan over one
//! collection. Writes for one `add` call share a transaction, so a failed
//! batch leaves the collection untouched.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use capability_lookup_core::embedding::{blob_to_vec, vec_to_blob};
use capability_lookup_core::error::IndexError;
use capability_lookup_core::models::{IndexedVector, Metadata, SearchResult};
use capability_lookup_core::store::{
    check_batch_dims, rank_results, DistanceMetric, VectorCollection, VectorStore,
};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Wrap a pool whose schema has already been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<Arc<dyn VectorCollection>, IndexError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO collections (name, metric, dims, created_at) VALUES (?, ?, NULL, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(metric.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexError::backend(name, "open", e))?;

        let existing: String = sqlx::query_scalar("SELECT metric FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IndexError::backend(name, "open", e))?;

        if DistanceMetric::parse(&existing) != Some(metric) {
            return Err(IndexError::MetricMismatch {
                collection: name.to_string(),
                operation: "open",
                existing,
                requested: metric.to_string(),
            });
        }

        let collection: Arc<dyn VectorCollection> = Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
            metric,
        });
        Ok(collection)
    }
}

pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    metric: DistanceMetric,
}

impl SqliteCollection {
    fn err(&self, operation: &'static str, e: impl std::fmt::Display) -> IndexError {
        IndexError::backend(&self.name, operation, e)
    }
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn add(&self, items: &[IndexedVector]) -> Result<(), IndexError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| self.err("add", e))?;

        let stored: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT dims FROM collections WHERE name = ?")
                .bind(&self.name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| self.err("add", e))?;
        let dims = check_batch_dims(&self.name, stored.map(|d| d as usize), items)?;
        if stored.is_none() {
            if let Some(d) = dims {
                sqlx::query("UPDATE collections SET dims = ? WHERE name = ?")
                    .bind(d as i64)
                    .bind(&self.name)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| self.err("add", e))?;
            }
        }

        let now = chrono::Utc::now().timestamp();
        for item in items {
            let metadata_json =
                serde_json::to_string(&item.metadata).map_err(|e| self.err("add", e))?;
            sqlx::query(
                r#"
                INSERT INTO vectors (collection, id, embedding, document, metadata_json, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.name)
            .bind(&item.id)
            .bind(vec_to_blob(&item.vector))
            .bind(&item.text)
            .bind(&metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err("add", e))?;
        }

        tx.commit().await.map_err(|e| self.err("add", e))?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if let Some(d) = self.dims().await? {
            if d != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    collection: self.name.clone(),
                    operation: "query",
                    expected: d,
                    actual: vector.len(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT id, embedding, document, metadata_json FROM vectors WHERE collection = ?",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err("query", e))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            results.push(SearchResult {
                id: row.get("id"),
                text: row.get("document"),
                distance: self.metric.distance(vector, &blob_to_vec(&blob)),
                metadata,
            });
        }
        Ok(rank_results(results, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.err("count", e))?;
        Ok(n as usize)
    }

    async fn dims(&self) -> Result<Option<usize>, IndexError> {
        let d: Option<i64> = sqlx::query_scalar::<_, Option<i64>>("SELECT dims FROM collections WHERE name = ?")
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err("dims", e))?
            .flatten();
        Ok(d.map(|d| d as usize))
    }
}
