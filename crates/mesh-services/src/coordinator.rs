//! Mesh coordinator: decides, per membership event, what happens to the
//! registry and to the peer links.
//!
//! Per participant id the coordinator walks `Unknown → Joining → Joined` and
//! drops back to `Unknown` on any removal. Every transition goes through the
//! registry's atomic insert/remove, so events for the same id can race
//! freely: exactly one of them wins the insert and is allowed to open a
//! link. Events for different ids run in parallel as separate tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};

use mesh_core::ServerDescriptor;

use crate::link::{Connector, PeerLinkManager};
use crate::registry::{MemberState, MembershipRegistry};

/// A membership notification, as delivered by the rendezvous client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// Full membership from a Join reply, at startup or after a reconnect.
    Snapshot(Vec<ServerDescriptor>),
    /// Another participant announced arrival.
    Joined(ServerDescriptor),
    /// Another participant announced departure.
    Left(ServerDescriptor),
}

/// How a single join attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A link is up and the participant is `Joined`.
    Linked,
    /// Another event for the same id already owns it. Not an error.
    AlreadyKnown,
    /// The announcement was our own.
    Local,
    /// The link could not be opened; the participant is back to unknown.
    Failed,
    /// Superseded before the link came up; the participant is back to unknown.
    Cancelled,
}

struct Inner<C> {
    local: ServerDescriptor,
    registry: MembershipRegistry,
    links: PeerLinkManager<C>,
    // in-flight join attempts, keyed by participant id
    pending: DashMap<String, (u64, oneshot::Sender<()>)>,
    next_attempt: AtomicU64,
    closing: AtomicBool,
}

pub struct MeshCoordinator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for MeshCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> MeshCoordinator<C> {
    pub fn new(
        local: ServerDescriptor,
        registry: MembershipRegistry,
        links: PeerLinkManager<C>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                registry,
                links,
                pending: DashMap::new(),
                next_attempt: AtomicU64::new(1),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &MembershipRegistry {
        &self.inner.registry
    }

    pub fn links(&self) -> &PeerLinkManager<C> {
        &self.inner.links
    }

    /// Consume events until `shutdown` fires or the sender side goes away.
    ///
    /// Each event is handed off to its own task; this loop never waits on a
    /// connection attempt.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<MeshEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        tracing::info!("coordinator stopped accepting membership events");
    }

    /// Dispatch one event without waiting for its outcome.
    pub fn handle_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::Snapshot(servers) => {
                tracing::info!(
                    servers = servers.len(),
                    known = self.inner.registry.len(),
                    "reconciling membership snapshot"
                );
                for server in servers {
                    self.spawn_join(server);
                }
            }
            MeshEvent::Joined(server) => self.spawn_join(server),
            MeshEvent::Left(server) => self.handle_leave(&server),
        }
    }

    fn spawn_join(&self, server: ServerDescriptor) {
        let this = self.clone();
        tokio::spawn(async move {
            this.join(server).await;
        });
    }

    /// Run one join attempt for `server` to completion.
    pub async fn join(&self, server: ServerDescriptor) -> JoinOutcome {
        if server.id == self.inner.local.id {
            tracing::trace!("ignoring own announcement");
            return JoinOutcome::Local;
        }
        if self.inner.closing.load(Ordering::SeqCst) {
            return JoinOutcome::Cancelled;
        }
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        if !self.inner.registry.insert_for_attempt(&server, attempt) {
            tracing::debug!(server = %server, "server already known");
            return JoinOutcome::AlreadyKnown;
        }

        // Unknown → Joining
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.inner
            .pending
            .insert(server.id.clone(), (attempt, cancel_tx));

        // Shutdown may have drained `pending` just before the insert above.
        if self.inner.closing.load(Ordering::SeqCst) {
            self.finish_attempt(&server.id, attempt);
            self.inner.registry.remove_for_attempt(&server.id, attempt);
            return JoinOutcome::Cancelled;
        }

        let opened = tokio::select! {
            biased;
            _ = cancel_rx => None,
            r = self.inner.links.open(&server) => Some(r),
        };
        self.finish_attempt(&server.id, attempt);

        match opened {
            Some(Ok(())) => {
                // Joining → Joined, unless the link already died and the id moved on
                if self.inner.registry.mark_joined(&server.id, attempt) {
                    tracing::debug!(server = %server, "server joined");
                }
                JoinOutcome::Linked
            }
            Some(Err(e)) => {
                tracing::error!(
                    server = %server,
                    error = %e.source,
                    "unable to connect to server"
                );
                self.inner.registry.remove_for_attempt(&server.id, attempt);
                JoinOutcome::Failed
            }
            None => {
                tracing::info!(server = %server, "join cancelled before link was established");
                self.inner.registry.remove_for_attempt(&server.id, attempt);
                JoinOutcome::Cancelled
            }
        }
    }

    fn finish_attempt(&self, id: &str, attempt: u64) {
        self.inner.pending.remove_if(id, |_, (a, _)| *a == attempt);
    }

    /// Departure announcements only matter while a link is still being
    /// opened. A joined participant stays until its link is seen closed.
    pub fn handle_leave(&self, server: &ServerDescriptor) {
        if server.id == self.inner.local.id {
            return;
        }
        match self.inner.registry.state(&server.id) {
            Some(MemberState::Joining) => {
                if self.cancel_join(&server.id) {
                    tracing::info!(server = %server, "server left while joining");
                }
            }
            Some(MemberState::Joined) => {
                tracing::info!(server = %server, "server announced departure");
            }
            None => tracing::debug!(server = %server, "departure of unknown server"),
        }
    }

    /// Abort the in-flight join for `id`, if any. The attempt rolls its
    /// registry entry back itself.
    pub fn cancel_join(&self, id: &str) -> bool {
        match self.inner.pending.remove(id) {
            Some((_, (_, cancel))) => {
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Number of join attempts currently in flight.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Cancel every pending join, close every link (running their close
    /// callbacks) and clear the registry. Further joins are refused.
    pub async fn shutdown(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self
            .inner
            .pending
            .iter()
            .map(|e| e.key().clone())
            .collect();
        let cancelled = ids.iter().filter(|id| self.cancel_join(id)).count();

        let closed = self.inner.links.close_all().await;
        self.inner.registry.clear();
        tracing::info!(cancelled, closed, "mesh coordinator shut down");
    }
}
