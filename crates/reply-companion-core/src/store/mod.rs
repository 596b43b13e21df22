//! Storage abstraction for Reply Companion.
//!
//! Persisted state lives in four logical namespaces, each behind its own
//! trait so backends can be swapped (SQLite on the native host, in-memory
//! for tests and WASM):
//!
//! | Trait | Namespace | Keyed by |
//! |-------|-----------|----------|
//! | [`ContextStore`] | `activeContextCache` | [`ContextId`] |
//! | [`ArtifactStore`] | `artifactCache` | [`Fingerprint`] |
//! | [`SnapshotStore`] | `sessionSnapshot` | singleton |
//! | [`PreferenceStore`] | user preferences | opaque string key |
//!
//! The traits are raw key/value access. Policy (capacity, eviction,
//! empty-reply rejection) lives in [`crate::artifact_cache::ArtifactCache`],
//! and degradation on failure lives with the callers.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ContextId, Fingerprint, GenerationArtifact, Post, SessionSnapshot};

/// One row of the artifact namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactEntry {
    pub fingerprint: Fingerprint,
    pub artifact: GenerationArtifact,
}

/// Per-context "current post" storage, owned by the coordinator.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Stores or overwrites the post for `context`.
    async fn report(&self, context: &ContextId, post: &Post) -> Result<()>;

    /// Returns the stored post, or `None` for an unknown context.
    async fn get_current(&self, context: &ContextId) -> Result<Option<Post>>;

    /// Removes the entry. Clearing an absent context is a no-op.
    async fn clear(&self, context: &ContextId) -> Result<()>;

    /// Removes every entry. Used when a new host session starts and the
    /// previous session's context ids are meaningless.
    async fn clear_all(&self) -> Result<()>;
}

/// Raw artifact storage. Use through [`crate::artifact_cache::ArtifactCache`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get_artifact(&self, fingerprint: &Fingerprint) -> Result<Option<GenerationArtifact>>;

    /// Inserts or replaces. Replacing keeps the entry's original insertion
    /// position in [`list_artifacts`](ArtifactStore::list_artifacts).
    async fn upsert_artifact(
        &self,
        fingerprint: &Fingerprint,
        artifact: &GenerationArtifact,
    ) -> Result<()>;

    async fn remove_artifact(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// All entries, oldest insertion first.
    async fn list_artifacts(&self) -> Result<Vec<ArtifactEntry>>;
}

/// Single-slot snapshot persistence with overwrite semantics.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Saves a snapshot, replacing any previous one wholesale.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    async fn load(&self) -> Result<Option<SessionSnapshot>>;

    async fn clear(&self) -> Result<()>;
}

/// Opaque key/value storage for user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set_preference(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}
