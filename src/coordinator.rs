//! Process-wide broker between post extraction and the reply panel.
//!
//! The extraction side and the panel have independent lifecycles and no
//! shared memory, so everything goes through messages. The [`Coordinator`]
//! runs as a single tokio task that handles one message at a time and owns
//! the per-context "current post" store:
//!
//! ```text
//!  extractor ──PostObserved──▶ ┌─────────────┐ ──relay──▶ panel(s)
//!  panel ──QueryCurrentPost──▶ │ Coordinator │ ──reveal─▶ host
//!  host ──ContextDestroyed───▶ └──────┬──────┘
//!                                     ▼
//!                               ContextStore
//! ```
//!
//! For one context, a query sent after `post_observed` returned sees the
//! reported post: the channel is FIFO and `post_observed` resolves only
//! once the store write is done. Store failures are logged; the
//! notification still reaches the host and any listening panel, and late
//! joiners just find no cached post.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use reply_companion_core::models::{ContextId, Post};
use reply_companion_core::session::CurrentPostSource;
use reply_companion_core::store::ContextStore;

use crate::host::HostEnvironment;

/// Upper bound on how long the coordinator waits for the host to reveal
/// the panel before moving on.
const REVEAL_TIMEOUT: Duration = Duration::from_secs(2);

const RELAY_CAPACITY: usize = 64;

/// How a current-post query picks the context to answer for.
///
/// The browser's notion of the "active" tab can lag behind or differ from
/// the tab the query came from when several windows are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveContextPolicy {
    /// The host's active context when known, the requesting context
    /// otherwise.
    #[default]
    HostActive,
    /// The requesting context when known, the host's active context
    /// otherwise.
    Requester,
}

impl ActiveContextPolicy {
    pub async fn resolve(
        &self,
        origin: Option<&ContextId>,
        host: &dyn HostEnvironment,
    ) -> Option<ContextId> {
        match self {
            ActiveContextPolicy::Requester => match origin {
                Some(ctx) => Some(ctx.clone()),
                None => host.active_context().await,
            },
            ActiveContextPolicy::HostActive => match host.active_context().await {
                Some(ctx) => Some(ctx),
                None => origin.cloned(),
            },
        }
    }
}

/// A post reported for a context, as relayed to listening panels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostObserved {
    pub context_id: ContextId,
    pub post: Post,
}

enum Command {
    PostObserved {
        event: PostObserved,
        done: oneshot::Sender<()>,
    },
    QueryCurrentPost {
        origin: Option<ContextId>,
        reply: oneshot::Sender<Option<Post>>,
    },
    ContextDestroyed {
        context: ContextId,
        done: oneshot::Sender<()>,
    },
}

pub struct Coordinator {
    contexts: Arc<dyn ContextStore>,
    host: Arc<dyn HostEnvironment>,
    policy: ActiveContextPolicy,
    relay: broadcast::Sender<PostObserved>,
}

impl Coordinator {
    pub fn new(
        contexts: Arc<dyn ContextStore>,
        host: Arc<dyn HostEnvironment>,
        policy: ActiveContextPolicy,
    ) -> Self {
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            contexts,
            host,
            policy,
            relay,
        }
    }

    /// Starts the message loop. It runs until every handle is dropped.
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            tx,
            relay: self.relay.clone(),
        };

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                self.handle(command).await;
            }
            debug!("Coordinator stopped: all handles dropped");
        });

        handle
    }

    async fn handle(&self, command: Command) {
        match command {
            Command::PostObserved { event, done } => {
                self.on_post_observed(event).await;
                let _ = done.send(());
            }
            Command::QueryCurrentPost { origin, reply } => {
                let post = self.on_query(origin.as_ref()).await;
                let _ = reply.send(post);
            }
            Command::ContextDestroyed { context, done } => {
                if let Err(e) = self.contexts.clear(&context).await {
                    warn!("Could not clear context {}: {:#}", context, e);
                }
                let _ = done.send(());
            }
        }
    }

    async fn on_post_observed(&self, event: PostObserved) {
        let context = &event.context_id;
        if let Err(e) = self.contexts.report(context, &event.post).await {
            warn!(
                "Could not cache post for context {}; late-opening panels will not see it: {:#}",
                context, e
            );
        }

        // Only after the write, so a panel revealed by this can query it.
        match tokio::time::timeout(REVEAL_TIMEOUT, self.host.reveal_viewer(context)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Host could not reveal panel for {}: {:#}", context, e),
            Err(_) => warn!("Host did not reveal panel for {} in time", context),
        }

        // No subscribers is normal: the panel may not be open yet.
        let _ = self.relay.send(event);
    }

    async fn on_query(&self, origin: Option<&ContextId>) -> Option<Post> {
        let context = self.policy.resolve(origin, self.host.as_ref()).await?;
        match self.contexts.get_current(&context).await {
            Ok(post) => post,
            Err(e) => {
                warn!("Could not read current post for {}: {:#}", context, e);
                None
            }
        }
    }
}

/// Cloneable sender side of the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    relay: broadcast::Sender<PostObserved>,
}

impl CoordinatorHandle {
    /// Reports a post for `context` and waits until it is stored, the host
    /// has been asked to reveal the panel, and listeners have been notified.
    pub async fn post_observed(&self, context: ContextId, post: Post) -> Result<()> {
        post.validate()?;
        let (done, rx) = oneshot::channel();
        self.send(Command::PostObserved {
            event: PostObserved {
                context_id: context,
                post,
            },
            done,
        })?;
        rx.await.map_err(|_| anyhow!("coordinator dropped the request"))
    }

    pub async fn query_current_post(&self, origin: Option<&ContextId>) -> Result<Option<Post>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::QueryCurrentPost {
            origin: origin.cloned(),
            reply,
        })?;
        rx.await.map_err(|_| anyhow!("coordinator dropped the request"))
    }

    pub async fn context_destroyed(&self, context: ContextId) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::ContextDestroyed { context, done })?;
        rx.await.map_err(|_| anyhow!("coordinator dropped the request"))
    }

    /// Receives every post relayed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PostObserved> {
        self.relay.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("coordinator is not running"))
    }
}

#[async_trait]
impl CurrentPostSource for CoordinatorHandle {
    async fn current_post(&self, origin: Option<&ContextId>) -> Result<Option<Post>> {
        self.query_current_post(origin).await
    }
}
