//! SQLite-backed storage for every namespace.
//!
//! Maps each storage trait onto one table created by [`crate::migrate`]:
//! `active_context`, `artifact_cache`, `session_snapshot`, `preferences`.
//! Structured values (posts, snapshots, metrics, preference values) are
//! stored as JSON text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use reply_companion_core::models::{
    ContextId, Fingerprint, GenerationArtifact, Post, SessionSnapshot,
};
use reply_companion_core::store::{
    ArtifactEntry, ArtifactStore, ContextStore, PreferenceStore, SnapshotStore,
};

/// SQLite implementation of the storage traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn artifact_from_row(row: &SqliteRow) -> Result<ArtifactEntry> {
    let usage_json: Option<String> = row.get("usage_json");
    let cost_json: Option<String> = row.get("cost_json");
    let usage = usage_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .context("corrupt usage_json in artifact_cache")?;
    let cost = cost_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .context("corrupt cost_json in artifact_cache")?;

    Ok(ArtifactEntry {
        fingerprint: Fingerprint::from_raw(row.get::<String, _>("fingerprint")),
        artifact: GenerationArtifact {
            generated_text: row.get("generated_text"),
            usage,
            cost,
            model: row.get("model"),
            explanation: row.get("explanation"),
            last_updated: row.get("last_updated"),
        },
    })
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn report(&self, context: &ContextId, post: &Post) -> Result<()> {
        let post_json = serde_json::to_string(post)?;
        sqlx::query(
            r#"
            INSERT INTO active_context (context_id, post_json, reported_at)
            VALUES (?, ?, ?)
            ON CONFLICT(context_id) DO UPDATE SET
                post_json = excluded.post_json,
                reported_at = excluded.reported_at
            "#,
        )
        .bind(context.as_str())
        .bind(&post_json)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_current(&self, context: &ContextId) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT post_json FROM active_context WHERE context_id = ?")
            .bind(context.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("post_json");
                let post = serde_json::from_str(&json)
                    .with_context(|| format!("corrupt post for context {}", context))?;
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, context: &ContextId) -> Result<()> {
        sqlx::query("DELETE FROM active_context WHERE context_id = ?")
            .bind(context.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM active_context")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn get_artifact(&self, fingerprint: &Fingerprint) -> Result<Option<GenerationArtifact>> {
        let row = sqlx::query(
            r#"
            SELECT fingerprint, generated_text, model, explanation, usage_json, cost_json, last_updated
            FROM artifact_cache WHERE fingerprint = ?
            "#,
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| artifact_from_row(&r).map(|e| e.artifact))
            .transpose()
    }

    async fn upsert_artifact(
        &self,
        fingerprint: &Fingerprint,
        artifact: &GenerationArtifact,
    ) -> Result<()> {
        let usage_json = artifact.usage.map(|u| serde_json::to_string(&u)).transpose()?;
        let cost_json = artifact.cost.map(|c| serde_json::to_string(&c)).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO artifact_cache (fingerprint, generated_text, model, explanation,
                                        usage_json, cost_json, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                generated_text = excluded.generated_text,
                model = excluded.model,
                explanation = excluded.explanation,
                usage_json = excluded.usage_json,
                cost_json = excluded.cost_json,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(&artifact.generated_text)
        .bind(&artifact.model)
        .bind(&artifact.explanation)
        .bind(&usage_json)
        .bind(&cost_json)
        .bind(artifact.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_artifact(&self, fingerprint: &Fingerprint) -> Result<()> {
        sqlx::query("DELETE FROM artifact_cache WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<Vec<ArtifactEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT fingerprint, generated_text, model, explanation, usage_json, cost_json, last_updated
            FROM artifact_cache ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(artifact_from_row).collect()
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO session_snapshot (id, snapshot_json, saved_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(&json)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>> {
        let row = sqlx::query("SELECT snapshot_json FROM session_snapshot WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("snapshot_json");
                Ok(Some(
                    serde_json::from_str(&json).context("corrupt session snapshot")?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM session_snapshot")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get_preference(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value_json FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("value_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn set_preference(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::migrate_pool;
    use reply_companion_core::artifact_cache::{ArtifactCache, PutOutcome};
    use reply_companion_core::models::{ArtifactPatch, UsageMetrics};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("reply.sqlite"))
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn test_context_report_get_clear() {
        let (_tmp, store) = test_store().await;
        let ctx = ContextId::from(7);
        let post = Post::new("Hello world")
            .unwrap()
            .with_author("@someone")
            .with_source_url("https://x.com/someone/status/1");

        store.report(&ctx, &post).await.unwrap();
        assert_eq!(store.get_current(&ctx).await.unwrap(), Some(post));

        ContextStore::clear(&store, &ctx).await.unwrap();
        ContextStore::clear(&store, &ctx).await.unwrap();
        assert_eq!(store.get_current(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_all_contexts() {
        let (_tmp, store) = test_store().await;
        store.report(&ContextId::from(1), &Post::new("a").unwrap()).await.unwrap();
        store.report(&ContextId::from(2), &Post::new("b").unwrap()).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.get_current(&ContextId::from(1)).await.unwrap().is_none());
        assert!(store.get_current(&ContextId::from(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (_tmp, store) = test_store().await;
        let snapshot = SessionSnapshot {
            current_post: Some(Post::new("X").unwrap()),
            generated_text: "Reply".to_string(),
            usage: Some(UsageMetrics {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "gemini-2.0-flash".to_string(),
            last_updated: 1234,
            ..SessionSnapshot::default()
        };

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot.clone()));

        let replaced = SessionSnapshot::default();
        store.save(&replaced).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(replaced));

        SnapshotStore::clear(&store).await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_artifact_cache_over_sqlite() {
        let (_tmp, store) = test_store().await;
        let cache = ArtifactCache::with_capacity(Arc::new(store.clone()), 3).unwrap();

        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            cache
                .put(
                    &Fingerprint::from_text(text),
                    &GenerationArtifact::new("reply", "m", 100 + i as i64),
                )
                .await
                .unwrap();
        }
        // Replacing "a" keeps its insertion slot but refreshes its timestamp.
        cache
            .put(&Fingerprint::from_text("a"), &GenerationArtifact::new("again", "m", 500))
            .await
            .unwrap();

        let outcome = cache
            .put(&Fingerprint::from_text("d"), &GenerationArtifact::new("reply", "m", 600))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PutOutcome::Inserted {
                evicted: Some(Fingerprint::from_text("b"))
            }
        );

        let entries = store.list_artifacts().await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.fingerprint.as_str()).collect();
        assert_eq!(keys, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_artifact_update_persists_explanation() {
        let (_tmp, store) = test_store().await;
        let cache = ArtifactCache::new(Arc::new(store.clone()));
        let fp = Fingerprint::from_text("post");
        cache
            .put(&fp, &GenerationArtifact::new("Great point", "m", 1))
            .await
            .unwrap();
        cache
            .update(&fp, &ArtifactPatch::explanation("Because", 2))
            .await
            .unwrap();

        let stored = store.get_artifact(&fp).await.unwrap().unwrap();
        assert_eq!(stored.generated_text, "Great point");
        assert_eq!(stored.explanation.as_deref(), Some("Because"));
        assert_eq!(stored.last_updated, 2);
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let (_tmp, store) = test_store().await;
        assert!(store.get_preference("preferences").await.unwrap().is_none());
        let value = serde_json::json!({ "tone": "witty" });
        store.set_preference("preferences", &value).await.unwrap();
        assert_eq!(store.get_preference("preferences").await.unwrap(), Some(value));
    }
}
