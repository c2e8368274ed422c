//! Collection statistics.
//!
//! A quick summary of what is indexed: vector count, dimensionality,
//! metric, and a per-workbook breakdown. Used by `caplook stats` to confirm
//! that an index run actually wrote something.

use std::path::Path;

use anyhow::Result;
use capability_lookup_core::store::VectorCollection;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionStats {
    pub collection: String,
    pub metric: String,
    pub dims: Option<usize>,
    pub vectors: usize,
    pub database: String,
    pub database_bytes: u64,
    pub files: Vec<FileStats>,
}

/// Vectors and distinct records per source workbook.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileStats {
    pub file_name: String,
    pub records: i64,
    pub vectors: i64,
    pub last_indexed: Option<i64>,
}

pub async fn collect(
    collection: &dyn VectorCollection,
    pool: Option<&SqlitePool>,
    db_path: &Path,
) -> Result<CollectionStats> {
    let files = match pool {
        Some(pool) => file_breakdown(pool, collection.name()).await?,
        None => Vec::new(),
    };
    Ok(CollectionStats {
        collection: collection.name().to_string(),
        metric: collection.metric().to_string(),
        dims: collection.dims().await?,
        vectors: collection.count().await?,
        database: db_path.display().to_string(),
        database_bytes: std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0),
        files,
    })
}

async fn file_breakdown(pool: &SqlitePool, collection: &str) -> Result<Vec<FileStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            COALESCE(json_extract(metadata_json, '$.file_name'), '(unknown)') AS file_name,
            COUNT(DISTINCT json_extract(metadata_json, '$.record_id')) AS records,
            COUNT(*) AS vectors,
            MAX(updated_at) AS last_indexed
        FROM vectors
        WHERE collection = ?
        GROUP BY file_name
        ORDER BY vectors DESC, file_name ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| FileStats {
            file_name: row.get("file_name"),
            records: row.get("records"),
            vectors: row.get("vectors"),
            last_indexed: row.get("last_indexed"),
        })
        .collect())
}

/// Print stats in the human-readable layout.
pub fn print_stats(stats: &CollectionStats) {
    println!("Capability Lookup - Index Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", stats.database);
    println!("  Size:        {}", format_bytes(stats.database_bytes));
    println!("  Collection:  {}", stats.collection);
    println!("  Metric:      {}", stats.metric);
    println!(
        "  Dimensions:  {}",
        stats
            .dims
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Vectors:     {}", stats.vectors);

    if !stats.files.is_empty() {
        println!();
        println!("  By workbook:");
        println!(
            "  {:<36} {:>8} {:>8}   {}",
            "FILE", "RECORDS", "VECTORS", "LAST INDEXED"
        );
        println!("  {}", "-".repeat(72));
        for f in &stats.files {
            let when = f
                .last_indexed
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<36} {:>8} {:>8}   {}",
                f.file_name, f.records, f.vectors, when
            );
        }
    }
    println!();
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::SqliteVectorStore;
    use crate::{db, migrate};
    use capability_lookup_core::models::{IndexedVector, Metadata};
    use capability_lookup_core::store::{DistanceMetric, VectorStore};

    fn vector(id: &str, file: &str, record: &str) -> IndexedVector {
        let mut metadata = Metadata::new();
        metadata.insert("file_name".into(), file.into());
        metadata.insert("record_id".into(), record.into());
        IndexedVector {
            id: id.into(),
            vector: vec![1.0, 0.0, 0.0],
            text: id.into(),
            metadata,
        }
    }

    #[tokio::test]
    async fn stats_group_vectors_by_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        let pool = db::connect(&path).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteVectorStore::new(pool.clone());
        let coll = store
            .get_or_create_collection("capability_chunks", DistanceMetric::Cosine)
            .await
            .unwrap();
        coll.add(&[
            vector("a0", "wealth.xlsx", "r1"),
            vector("a1", "wealth.xlsx", "r1"),
            vector("b0", "wealth.xlsx", "r2"),
            vector("c0", "payments.xlsx", "r3"),
        ])
        .await
        .unwrap();

        let stats = collect(coll.as_ref(), Some(&pool), &path).await.unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.dims, Some(3));
        assert_eq!(stats.metric, "cosine");
        assert_eq!(stats.files.len(), 2);
        assert_eq!(stats.files[0].file_name, "wealth.xlsx");
        assert_eq!(stats.files[0].records, 2);
        assert_eq!(stats.files[0].vectors, 3);
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
