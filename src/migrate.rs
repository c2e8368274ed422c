use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per collection; metric is fixed at creation, dims at first add.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            metric TEXT NOT NULL,
            dims INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            document TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_updated_at ON vectors(collection, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
