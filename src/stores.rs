//! Opens the configured storage backend.
//!
//! Both backends implement every storage trait; [`Stores`] hands out one
//! trait object per namespace so the coordinator, panel, and preference
//! code each see only what they use.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use reply_companion_core::artifact_cache::ArtifactCache;
use reply_companion_core::store::memory::InMemoryStore;
use reply_companion_core::store::{ArtifactStore, ContextStore, PreferenceStore, SnapshotStore};

use crate::config::{Config, StorageBackend};
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

#[derive(Clone)]
pub struct Stores {
    pub contexts: Arc<dyn ContextStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub preferences: Arc<dyn PreferenceStore>,
}

impl Stores {
    /// Opens the backend named in `[storage]`. The SQLite schema is
    /// migrated on open.
    pub async fn open(config: &Config) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage; state is lost on exit");
                Ok(Self::in_memory())
            }
            StorageBackend::Sqlite => {
                let pool = db::connect(config).await?;
                migrate::migrate_pool(&pool).await?;
                info!("Using SQLite storage at {}", config.db.path.display());
                Ok(Self::sqlite(SqliteStore::new(pool)))
            }
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            contexts: store.clone(),
            artifacts: store.clone(),
            snapshots: store.clone(),
            preferences: store,
        }
    }

    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            contexts: store.clone(),
            artifacts: store.clone(),
            snapshots: store.clone(),
            preferences: store,
        }
    }

    pub fn artifact_cache(&self, capacity: usize) -> Result<ArtifactCache> {
        ArtifactCache::with_capacity(self.artifacts.clone(), capacity)
    }
}
