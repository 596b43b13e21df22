//! In-memory store implementation for testing and WASM targets.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! State lives exactly as long as the store value, which matches the
//! "survives within one browser session" lifetime of the extension's
//! session storage.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{ContextId, Fingerprint, GenerationArtifact, Post, SessionSnapshot};

use super::{ArtifactEntry, ArtifactStore, ContextStore, PreferenceStore, SnapshotStore};

/// In-memory store implementing every storage namespace.
#[derive(Default)]
pub struct InMemoryStore {
    contexts: RwLock<HashMap<ContextId, Post>>,
    artifacts: RwLock<Vec<ArtifactEntry>>,
    snapshot: RwLock<Option<SessionSnapshot>>,
    preferences: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl ContextStore for InMemoryStore {
    async fn report(&self, context: &ContextId, post: &Post) -> Result<()> {
        write(&self.contexts)?.insert(context.clone(), post.clone());
        Ok(())
    }

    async fn get_current(&self, context: &ContextId) -> Result<Option<Post>> {
        Ok(read(&self.contexts)?.get(context).cloned())
    }

    async fn clear(&self, context: &ContextId) -> Result<()> {
        write(&self.contexts)?.remove(context);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        write(&self.contexts)?.clear();
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn get_artifact(&self, fingerprint: &Fingerprint) -> Result<Option<GenerationArtifact>> {
        Ok(read(&self.artifacts)?
            .iter()
            .find(|e| &e.fingerprint == fingerprint)
            .map(|e| e.artifact.clone()))
    }

    async fn upsert_artifact(
        &self,
        fingerprint: &Fingerprint,
        artifact: &GenerationArtifact,
    ) -> Result<()> {
        let mut entries = write(&self.artifacts)?;
        match entries.iter_mut().find(|e| &e.fingerprint == fingerprint) {
            Some(entry) => entry.artifact = artifact.clone(),
            None => entries.push(ArtifactEntry {
                fingerprint: fingerprint.clone(),
                artifact: artifact.clone(),
            }),
        }
        Ok(())
    }

    async fn remove_artifact(&self, fingerprint: &Fingerprint) -> Result<()> {
        write(&self.artifacts)?.retain(|e| &e.fingerprint != fingerprint);
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<Vec<ArtifactEntry>> {
        Ok(read(&self.artifacts)?.clone())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        *write(&self.snapshot)? = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>> {
        Ok(read(&self.snapshot)?.clone())
    }

    async fn clear(&self) -> Result<()> {
        *write(&self.snapshot)? = None;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn get_preference(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(read(&self.preferences)?.get(key).cloned())
    }

    async fn set_preference(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        write(&self.preferences)?.insert(key.to_string(), value.clone());
        Ok(())
    }
}
