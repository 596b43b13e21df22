//! The host environment as seen by the coordinator.
//!
//! In the browser this is the tabs/side-panel API: it knows which tab is
//! focused and can open the reply panel for a tab. Here the extension's
//! background script reports focus changes to the HTTP bridge, and
//! [`TrackedHost`] remembers them.

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio::sync::RwLock;

use reply_companion_core::models::ContextId;

#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Asks the host to show the reply panel for `context`.
    async fn reveal_viewer(&self, context: &ContextId) -> Result<()>;

    /// The context the host currently considers active, if any.
    async fn active_context(&self) -> Option<ContextId>;
}

/// Host state fed by extension notifications.
#[derive(Default)]
pub struct TrackedHost {
    active: RwLock<Option<ContextId>>,
    last_revealed: RwLock<Option<ContextId>>,
}

impl TrackedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_active(&self, context: ContextId) {
        *self.active.write().await = Some(context);
    }

    /// Drops any reference to a destroyed context.
    pub async fn forget(&self, context: &ContextId) {
        let mut active = self.active.write().await;
        if active.as_ref() == Some(context) {
            *active = None;
        }
        drop(active);

        let mut revealed = self.last_revealed.write().await;
        if revealed.as_ref() == Some(context) {
            *revealed = None;
        }
    }

    pub async fn last_revealed(&self) -> Option<ContextId> {
        self.last_revealed.read().await.clone()
    }
}

#[async_trait]
impl HostEnvironment for TrackedHost {
    async fn reveal_viewer(&self, context: &ContextId) -> Result<()> {
        info!("Revealing reply panel for context {}", context);
        *self.last_revealed.write().await = Some(context.clone());
        Ok(())
    }

    async fn active_context(&self) -> Option<ContextId> {
        self.active.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forget_clears_matching_context_only() {
        let host = TrackedHost::new();
        host.set_active(ContextId::from(1)).await;
        host.reveal_viewer(&ContextId::from(2)).await.unwrap();

        host.forget(&ContextId::from(2)).await;
        assert_eq!(host.active_context().await, Some(ContextId::from(1)));
        assert_eq!(host.last_revealed().await, None);

        host.forget(&ContextId::from(1)).await;
        assert_eq!(host.active_context().await, None);
    }
}
