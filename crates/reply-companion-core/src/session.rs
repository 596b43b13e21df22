//! Panel session controller.
//!
//! A [`PanelSession`] is the state behind one open reply panel. It keeps
//! the panel's view of "current post + generated reply" consistent across
//! three kinds of churn:
//!
//! 1. **Panel teardown.** Every meaningful change is written wholesale to
//!    the [`SnapshotStore`], and [`mount`](PanelSession::mount) restores it.
//! 2. **Late mount.** A panel that opens after the post was observed asks
//!    the coordinator for the current post during mount.
//! 3. **Post switches.** Before switching away from a post, its reply is
//!    saved into the [`ArtifactCache`]; the incoming post is restored from
//!    the cache or starts with a clean slate.
//!
//! Generation runs outside the session. Each request is tagged with a
//! [`GenerationTicket`] naming the fingerprint it was issued for, and a
//! result whose fingerprint no longer matches the displayed post is
//! discarded instead of being written into the wrong post's state.
//!
//! Storage failures never surface to the caller: they are logged and the
//! session behaves as if caching were absent.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

use crate::artifact_cache::ArtifactCache;
use crate::models::{
    ArtifactPatch, ContextId, CostMetrics, Fingerprint, Post, SessionSnapshot, UsageMetrics,
};
use crate::store::SnapshotStore;

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Answers "what is the current post?" on behalf of the coordinator.
#[async_trait]
pub trait CurrentPostSource: Send + Sync {
    /// `origin` is the context the panel is attached to, if known.
    async fn current_post(&self, origin: Option<&ContextId>) -> Result<Option<Post>>;
}

/// Tag carried by an in-flight generation or explanation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTicket {
    pub id: u64,
    pub fingerprint: Fingerprint,
    /// The post the request was issued for, to build the prompt from.
    pub post: Post,
    /// For explanations, the reply being explained.
    pub reply: Option<String>,
}

/// A completed reply from the generation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub usage: Option<UsageMetrics>,
    pub cost: Option<CostMetrics>,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The ticket's post is no longer displayed.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// A cached reply for the incoming post was restored.
    Restored,
    /// No cached reply; generation fields were cleared.
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountReport {
    pub snapshot_restored: bool,
    /// Set when the coordinator reported a post different from the
    /// snapshot's and the session switched to it.
    pub adopted: Option<SwitchOutcome>,
}

/// Streaming text for the in-flight generation. Displayed, never persisted.
#[derive(Debug, Clone)]
struct Preview {
    ticket_id: u64,
    text: String,
}

pub struct PanelSession {
    artifacts: ArtifactCache,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    state: SessionSnapshot,
    preview: Option<Preview>,
    next_ticket: u64,
}

impl PanelSession {
    pub fn new(artifacts: ArtifactCache, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self::with_clock(artifacts, snapshots, Arc::new(SystemClock))
    }

    pub fn with_clock(
        artifacts: ArtifactCache,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            artifacts,
            snapshots,
            clock,
            state: SessionSnapshot::default(),
            preview: None,
            next_ticket: 1,
        }
    }

    pub fn state(&self) -> &SessionSnapshot {
        &self.state
    }

    /// Text to display: the streaming preview while a generation is in
    /// flight, the completed reply otherwise.
    pub fn display_text(&self) -> &str {
        match &self.preview {
            Some(preview) => &preview.text,
            None => &self.state.generated_text,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.preview.is_some()
    }

    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    /// Restores state when a panel opens.
    ///
    /// Loads the last snapshot, then asks `source` for the current post. A
    /// post with a different fingerprint than the snapshot's goes through
    /// the same transition as a live post switch.
    pub async fn mount(
        &mut self,
        source: &dyn CurrentPostSource,
        origin: Option<&ContextId>,
    ) -> MountReport {
        let mut report = MountReport::default();
        self.preview = None;

        match self.snapshots.load().await {
            Ok(Some(snapshot)) => {
                self.state = snapshot;
                report.snapshot_restored = true;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load session snapshot, starting empty: {:#}", e),
        }

        let reported = match source.current_post(origin).await {
            Ok(post) => post,
            Err(e) => {
                warn!("Current post query failed during mount: {:#}", e);
                None
            }
        };

        if let Some(post) = reported {
            if post.validate().is_ok() && self.state.current_fingerprint() != Some(post.fingerprint()) {
                report.adopted = Some(self.switch_to(post).await);
            }
        }

        report
    }

    /// Handles a live "post observed" notification for the panel's context.
    pub async fn on_post_observed(&mut self, post: Post) -> Result<SwitchOutcome> {
        post.validate()?;
        Ok(self.switch_to(post).await)
    }

    async fn switch_to(&mut self, post: Post) -> SwitchOutcome {
        // The outgoing reply must reach the cache before any state changes.
        if let Some((fingerprint, artifact)) = self.state.to_artifact() {
            if let Err(e) = self.artifacts.put(&fingerprint, &artifact).await {
                warn!("Could not cache reply for outgoing post: {:#}", e);
            }
        }

        let fingerprint = post.fingerprint();
        let cached = match self.artifacts.get(&fingerprint).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Artifact cache lookup failed: {:#}", e);
                None
            }
        };

        // A repeat observation of the displayed post keeps any in-flight preview.
        if self.state.current_fingerprint().as_ref() != Some(&fingerprint) {
            self.preview = None;
        }
        self.state.current_post = Some(post);
        let outcome = match cached {
            Some(artifact) => {
                self.state.adopt(&artifact);
                SwitchOutcome::Restored
            }
            None => {
                self.state.clear_generation();
                self.state.last_updated = self.clock.now_millis();
                SwitchOutcome::Fresh
            }
        };
        debug!("Switched to post {:?}: {:?}", fingerprint.as_str(), outcome);

        self.persist_snapshot().await;
        outcome
    }

    /// Starts a reply generation for the current post, or `None` if no
    /// post is displayed.
    pub fn begin_generation(&mut self) -> Option<GenerationTicket> {
        let ticket = self.issue_ticket()?;
        self.preview = Some(Preview {
            ticket_id: ticket.id,
            text: String::new(),
        });
        Some(ticket)
    }

    /// Starts an explanation request. Requires a completed reply.
    pub fn begin_explanation(&mut self) -> Option<GenerationTicket> {
        if self.state.generated_text.is_empty() {
            return None;
        }
        let mut ticket = self.issue_ticket()?;
        ticket.reply = Some(self.state.generated_text.clone());
        Some(ticket)
    }

    fn issue_ticket(&mut self) -> Option<GenerationTicket> {
        let post = self.state.current_post.clone()?;
        let id = self.next_ticket;
        self.next_ticket += 1;
        Some(GenerationTicket {
            id,
            fingerprint: post.fingerprint(),
            post,
            reply: None,
        })
    }

    pub fn is_current(&self, ticket: &GenerationTicket) -> bool {
        self.state.current_fingerprint().as_ref() == Some(&ticket.fingerprint)
    }

    /// Appends streamed text to the preview. Returns `false` if the ticket
    /// is stale or not the generation being previewed.
    pub fn push_partial(&mut self, ticket: &GenerationTicket, chunk: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        match &mut self.preview {
            Some(preview) if preview.ticket_id == ticket.id => {
                preview.text.push_str(chunk);
                true
            }
            _ => false,
        }
    }

    pub async fn complete_generation(
        &mut self,
        ticket: &GenerationTicket,
        result: GenerationResult,
    ) -> Completion {
        if !self.is_current(ticket) {
            debug!(
                "Discarding generation {} for {:?}: post has switched",
                ticket.id,
                ticket.fingerprint.as_str()
            );
            return Completion::Discarded;
        }
        self.drop_preview(ticket);

        self.state.generated_text = result.text;
        self.state.usage = result.usage;
        self.state.cost = result.cost;
        self.state.model = result.model;
        self.state.explanation = None;
        self.state.last_updated = self.clock.now_millis();

        self.persist_snapshot().await;
        if let Some((fingerprint, artifact)) = self.state.to_artifact() {
            if let Err(e) = self.artifacts.put(&fingerprint, &artifact).await {
                warn!("Could not cache generated reply: {:#}", e);
            }
        }
        Completion::Applied
    }

    pub async fn complete_explanation(
        &mut self,
        ticket: &GenerationTicket,
        explanation: String,
    ) -> Completion {
        let explains_current_reply =
            ticket.reply.as_deref() == Some(self.state.generated_text.as_str());
        if !self.is_current(ticket) || !explains_current_reply {
            debug!(
                "Discarding explanation {} for {:?}: post or reply has changed",
                ticket.id,
                ticket.fingerprint.as_str()
            );
            return Completion::Discarded;
        }

        let now = self.clock.now_millis();
        self.state.explanation = Some(explanation.clone());
        self.state.last_updated = now;
        self.persist_snapshot().await;

        let patch = ArtifactPatch::explanation(explanation, now);
        match self.artifacts.update(&ticket.fingerprint, &patch).await {
            Ok(true) => {}
            Ok(false) => {
                // Evicted since the reply was generated; re-insert in full.
                if let Some((fingerprint, artifact)) = self.state.to_artifact() {
                    if let Err(e) = self.artifacts.put(&fingerprint, &artifact).await {
                        warn!("Could not cache explanation: {:#}", e);
                    }
                }
            }
            Err(e) => warn!("Could not cache explanation: {:#}", e),
        }
        Completion::Applied
    }

    /// Abandons the preview of a failed generation. State is untouched.
    pub fn fail_generation(&mut self, ticket: &GenerationTicket) {
        self.drop_preview(ticket);
    }

    fn drop_preview(&mut self, ticket: &GenerationTicket) {
        if self.preview.as_ref().map(|p| p.ticket_id) == Some(ticket.id) {
            self.preview = None;
        }
    }

    async fn persist_snapshot(&self) {
        if let Err(e) = self.snapshots.save(&self.state).await {
            warn!("Could not save session snapshot: {:#}", e);
        }
    }
}
