//! Runtime wrapper around a [`PanelSession`].
//!
//! The session itself is a plain state machine; this module gives it an
//! async home. The session sits behind a `tokio::sync::Mutex` that is
//! never held across a generation call, so a post switch can land while a
//! reply is being generated. The switched-away reply then comes back with
//! a stale ticket and is discarded by the session.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use reply_companion_core::models::{ContextId, CostMetrics, Post, UsageMetrics};
use reply_companion_core::session::{Completion, MountReport, PanelSession, SwitchOutcome};
use reply_companion_core::store::PreferenceStore;

use crate::coordinator::{CoordinatorHandle, PostObserved};
use crate::generation::{GenerationRequest, Generator};
use crate::{preferences, prompt};

/// What the panel currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub context_id: Option<ContextId>,
    pub post: Option<Post>,
    pub fingerprint: Option<String>,
    /// The streaming preview while generating, the stored reply otherwise.
    pub text: String,
    pub is_generating: bool,
    pub usage: Option<UsageMetrics>,
    pub cost: Option<CostMetrics>,
    pub model: String,
    pub explanation: Option<String>,
    pub last_updated: i64,
}

pub struct PanelRuntime {
    session: Mutex<PanelSession>,
    coordinator: CoordinatorHandle,
    generator: Arc<dyn Generator>,
    preferences: Arc<dyn PreferenceStore>,
    attached: RwLock<Option<ContextId>>,
}

impl PanelRuntime {
    pub fn new(
        session: PanelSession,
        coordinator: CoordinatorHandle,
        generator: Arc<dyn Generator>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            coordinator,
            generator,
            preferences,
            attached: RwLock::new(None),
        })
    }

    /// Opens (or reopens) the panel for `context`.
    ///
    /// The context is attached before the session queries the coordinator,
    /// so a relay sent right after that query is not lost. It waits on the
    /// session lock and is applied once the mount finishes.
    pub async fn mount(&self, context: Option<ContextId>) -> MountReport {
        *self.attached.write().await = context.clone();
        let mut session = self.session.lock().await;
        let report = session.mount(&self.coordinator, context.as_ref()).await;
        info!(
            "Panel mounted for {}: snapshot restored = {}, adopted = {:?}",
            context.as_ref().map(|c| c.as_str()).unwrap_or("<none>"),
            report.snapshot_restored,
            report.adopted
        );
        report
    }

    pub async fn attached_context(&self) -> Option<ContextId> {
        self.attached.read().await.clone()
    }

    /// Applies a relayed post if it belongs to the attached context.
    pub async fn on_relay(&self, event: PostObserved) -> Option<SwitchOutcome> {
        if self.attached.read().await.as_ref() != Some(&event.context_id) {
            return None;
        }
        let mut session = self.session.lock().await;
        match session.on_post_observed(event.post).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Ignoring relayed post: {:#}", e);
                None
            }
        }
    }

    /// Follows coordinator relays until the coordinator shuts down.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.coordinator.subscribe();
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        runtime.on_relay(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Panel listener fell behind, skipped {} posts", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Panel listener stopped");
        })
    }

    /// Generates a reply for the displayed post, streaming into the preview.
    pub async fn generate(&self) -> Result<Completion> {
        let ticket = self
            .session
            .lock()
            .await
            .begin_generation()
            .ok_or_else(|| anyhow!("No post is displayed"))?;

        let prefs = preferences::load(self.preferences.as_ref()).await;
        let request = GenerationRequest {
            prompt: prompt::reply_prompt(&ticket.post, &prefs),
            model: prefs.model.clone(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let generation = self.generator.generate(&request, Some(tx));
        let forward = async {
            while let Some(chunk) = rx.recv().await {
                self.session.lock().await.push_partial(&ticket, &chunk);
            }
        };
        let (result, ()) = tokio::join!(generation, forward);

        let mut session = self.session.lock().await;
        match result {
            Ok(result) => Ok(session.complete_generation(&ticket, result).await),
            Err(e) => {
                session.fail_generation(&ticket);
                Err(e)
            }
        }
    }

    /// Generates an explanation of the displayed reply.
    pub async fn explain(&self) -> Result<Completion> {
        let ticket = self
            .session
            .lock()
            .await
            .begin_explanation()
            .ok_or_else(|| anyhow!("No reply to explain"))?;
        let reply = ticket.reply.as_deref().unwrap_or_default();

        let prefs = preferences::load(self.preferences.as_ref()).await;
        let request = GenerationRequest {
            prompt: prompt::explanation_prompt(&ticket.post, reply),
            model: prefs.model,
        };
        let result = self.generator.generate(&request, None).await?;

        let mut session = self.session.lock().await;
        Ok(session.complete_explanation(&ticket, result.text).await)
    }

    pub async fn view(&self) -> PanelView {
        let context_id = self.attached.read().await.clone();
        let session = self.session.lock().await;
        let state = session.state();
        PanelView {
            context_id,
            post: state.current_post.clone(),
            fingerprint: state.current_fingerprint().map(|f| f.as_str().to_string()),
            text: session.display_text().to_string(),
            is_generating: session.is_generating(),
            usage: state.usage,
            cost: state.cost,
            model: state.model.clone(),
            explanation: state.explanation.clone(),
            last_updated: state.last_updated,
        }
    }
}
