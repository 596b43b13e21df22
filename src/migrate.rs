use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Creates every table the SQLite backend needs. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Per-context pending post
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_context (
            context_id TEXT PRIMARY KEY,
            post_json TEXT NOT NULL,
            reported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-fingerprint results; seq preserves insertion order for eviction ties
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifact_cache (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL UNIQUE,
            generated_text TEXT NOT NULL,
            model TEXT NOT NULL DEFAULT '',
            explanation TEXT,
            usage_json TEXT,
            cost_json TEXT,
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            snapshot_json TEXT NOT NULL,
            saved_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_artifact_cache_last_updated ON artifact_cache(last_updated)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
