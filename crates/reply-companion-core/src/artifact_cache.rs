//! Bounded per-post result cache.
//!
//! [`ArtifactCache`] layers the caching policy over any [`ArtifactStore`]:
//!
//! - an artifact with an empty reply is never stored;
//! - inserting a new fingerprint into a full cache first evicts the entry
//!   with the smallest `last_updated`, ties going to the entry inserted
//!   first;
//! - replacing an existing fingerprint never evicts;
//! - [`update`](ArtifactCache::update) patches fields of an existing entry
//!   and does nothing when the fingerprint is absent.
//!
//! Eviction is a linear scan. The capacity is small and fixed, so a heap
//! or ordered index would buy nothing here; a larger capacity can swap one
//! in behind the same methods.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::models::{ArtifactPatch, Fingerprint, GenerationArtifact};
use crate::store::{ArtifactEntry, ArtifactStore};

/// Maximum number of cached artifacts unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10;

/// Result of [`ArtifactCache::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The artifact had an empty reply and was not stored.
    Rejected,
    /// A new fingerprint was inserted, possibly evicting another.
    Inserted { evicted: Option<Fingerprint> },
    /// An existing entry was overwritten.
    Replaced,
}

#[derive(Clone)]
pub struct ArtifactCache {
    store: Arc<dyn ArtifactStore>,
    capacity: usize,
}

impl ArtifactCache {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(store: Arc<dyn ArtifactStore>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("artifact cache capacity must be > 0");
        }
        Ok(Self { store, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<GenerationArtifact>> {
        self.store.get_artifact(fingerprint).await
    }

    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        artifact: &GenerationArtifact,
    ) -> Result<PutOutcome> {
        if artifact.generated_text.is_empty() {
            return Ok(PutOutcome::Rejected);
        }

        let mut entries = self.store.list_artifacts().await?;
        if entries.iter().any(|e| &e.fingerprint == fingerprint) {
            self.store.upsert_artifact(fingerprint, artifact).await?;
            return Ok(PutOutcome::Replaced);
        }

        // A store written under a larger capacity may hold more than one
        // surplus entry; evict until there is room for exactly one more.
        let mut evicted = None;
        while entries.len() >= self.capacity {
            let Some(victim) = eviction_candidate(&entries).map(|e| e.fingerprint.clone()) else {
                break;
            };
            self.store.remove_artifact(&victim).await?;
            entries.retain(|e| e.fingerprint != victim);
            evicted = Some(victim);
        }

        self.store.upsert_artifact(fingerprint, artifact).await?;
        Ok(PutOutcome::Inserted { evicted })
    }

    /// Merges `patch` into an existing entry. Returns `false` if the
    /// fingerprint is not cached; callers must `put` a base artifact first.
    pub async fn update(&self, fingerprint: &Fingerprint, patch: &ArtifactPatch) -> Result<bool> {
        let Some(mut artifact) = self.store.get_artifact(fingerprint).await? else {
            return Ok(false);
        };
        artifact.apply(patch);
        self.store.upsert_artifact(fingerprint, &artifact).await?;
        Ok(true)
    }

    pub async fn entries(&self) -> Result<Vec<ArtifactEntry>> {
        self.store.list_artifacts().await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.list_artifacts().await?.len())
    }

    /// Removes every entry and returns how many there were.
    pub async fn clear(&self) -> Result<usize> {
        let entries = self.store.list_artifacts().await?;
        for entry in &entries {
            self.store.remove_artifact(&entry.fingerprint).await?;
        }
        Ok(entries.len())
    }
}

/// The entry to evict: minimum `last_updated`, first in insertion order on
/// ties.
pub fn eviction_candidate(entries: &[ArtifactEntry]) -> Option<&ArtifactEntry> {
    // `min_by_key` returns the first of several equal minima.
    entries.iter().min_by_key(|e| e.artifact.last_updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn cache() -> ArtifactCache {
        ArtifactCache::new(Arc::new(InMemoryStore::new()))
    }

    fn artifact(text: &str, ts: i64) -> GenerationArtifact {
        GenerationArtifact::new(text, "gemini-2.0-flash", ts)
    }

    #[tokio::test]
    async fn test_evicts_oldest_when_full() {
        let cache = cache();
        let first = Fingerprint::from_text("Hello world");
        cache.put(&first, &artifact("Great point", 1000)).await.unwrap();
        for i in 1..10 {
            let fp = Fingerprint::from_text(&format!("post {}", i));
            cache.put(&fp, &artifact("reply", 1000 + i)).await.unwrap();
        }
        assert_eq!(cache.len().await.unwrap(), 10);

        let newest = Fingerprint::from_text("post 11");
        let outcome = cache.put(&newest, &artifact("late", 2000)).await.unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Inserted {
                evicted: Some(first.clone())
            }
        );
        assert_eq!(cache.len().await.unwrap(), 10);
        assert!(cache.get(&first).await.unwrap().is_none());
        assert_eq!(cache.get(&newest).await.unwrap().unwrap().generated_text, "late");
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let cache = ArtifactCache::with_capacity(Arc::new(InMemoryStore::new()), 3).unwrap();
        for i in 0..20 {
            let fp = Fingerprint::from_text(&format!("post {}", i));
            // Non-monotonic timestamps still evict the true minimum.
            cache.put(&fp, &artifact("r", (i * 7) % 11)).await.unwrap();
            assert!(cache.len().await.unwrap() <= 3);
        }
    }

    #[tokio::test]
    async fn test_evicted_entry_has_minimum_timestamp() {
        let cache = ArtifactCache::with_capacity(Arc::new(InMemoryStore::new()), 3).unwrap();
        cache.put(&Fingerprint::from_text("a"), &artifact("r", 50)).await.unwrap();
        cache.put(&Fingerprint::from_text("b"), &artifact("r", 10)).await.unwrap();
        cache.put(&Fingerprint::from_text("c"), &artifact("r", 30)).await.unwrap();

        let outcome = cache.put(&Fingerprint::from_text("d"), &artifact("r", 5)).await.unwrap();
        assert_eq!(
            outcome,
            PutOutcome::Inserted {
                evicted: Some(Fingerprint::from_text("b"))
            }
        );
    }

    #[tokio::test]
    async fn test_ties_evict_first_inserted() {
        let cache = ArtifactCache::with_capacity(Arc::new(InMemoryStore::new()), 2).unwrap();
        cache.put(&Fingerprint::from_text("a"), &artifact("r", 100)).await.unwrap();
        cache.put(&Fingerprint::from_text("b"), &artifact("r", 100)).await.unwrap();

        let outcome = cache.put(&Fingerprint::from_text("c"), &artifact("r", 100)).await.unwrap();
        assert_eq!(
            outcome,
            PutOutcome::Inserted {
                evicted: Some(Fingerprint::from_text("a"))
            }
        );
    }

    #[tokio::test]
    async fn test_empty_reply_rejected() {
        let cache = cache();
        let fp = Fingerprint::from_text("post");
        let outcome = cache.put(&fp, &artifact("", 1)).await.unwrap();
        assert_eq!(outcome, PutOutcome::Rejected);
        assert!(cache.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_in_full_cache_does_not_evict() {
        let cache = ArtifactCache::with_capacity(Arc::new(InMemoryStore::new()), 2).unwrap();
        let a = Fingerprint::from_text("a");
        let b = Fingerprint::from_text("b");
        cache.put(&a, &artifact("r", 1)).await.unwrap();
        cache.put(&b, &artifact("r", 2)).await.unwrap();

        let outcome = cache.put(&a, &artifact("newer", 3)).await.unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(cache.len().await.unwrap(), 2);
        assert!(cache.get(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_merges_explanation() {
        let cache = cache();
        let fp = Fingerprint::from_text("post");
        cache.put(&fp, &artifact("Great point", 1000)).await.unwrap();

        let patched = cache
            .update(&fp, &ArtifactPatch::explanation("It agrees.", 1200))
            .await
            .unwrap();
        assert!(patched);

        let stored = cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(stored.generated_text, "Great point");
        assert_eq!(stored.explanation.as_deref(), Some("It agrees."));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_absent_is_noop() {
        let cache = cache();
        let fp = Fingerprint::from_text("missing");
        let patched = cache
            .update(&fp, &ArtifactPatch::explanation("x", 1))
            .await
            .unwrap();
        assert!(!patched);
        assert!(cache.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shrunk_capacity_trims_surplus() {
        let store = Arc::new(InMemoryStore::new());
        let wide = ArtifactCache::with_capacity(store.clone(), 5).unwrap();
        for i in 0..5 {
            wide.put(&Fingerprint::from_text(&format!("p{}", i)), &artifact("r", i))
                .await
                .unwrap();
        }

        let narrow = ArtifactCache::with_capacity(store, 2).unwrap();
        narrow.put(&Fingerprint::from_text("new"), &artifact("r", 99)).await.unwrap();
        assert_eq!(narrow.len().await.unwrap(), 2);
        assert!(narrow.get(&Fingerprint::from_text("p4")).await.unwrap().is_some());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ArtifactCache::with_capacity(Arc::new(InMemoryStore::new()), 0).is_err());
    }
}
