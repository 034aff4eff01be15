//! A fully wired mesh participant: listener, registry, links,
//! coordinator and rendezvous client.

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use mesh_core::config::MeshConfig;
use mesh_core::{MeshError, ServerDescriptor};

use crate::coordinator::MeshCoordinator;
use crate::link::{PeerLinkManager, TcpConnector};
use crate::listener::PeerListener;
use crate::registry::MembershipRegistry;
use crate::rendezvous::{RendezvousClient, RendezvousHandle};

/// Capacity of the rendezvous → coordinator event queue.
const EVENT_QUEUE: usize = 256;

pub struct MeshNode {
    local: ServerDescriptor,
    coordinator: MeshCoordinator<TcpConnector>,
    rendezvous: RendezvousHandle,
    shutdown_tx: broadcast::Sender<()>,
    coordinator_task: JoinHandle<()>,
    listener_task: JoinHandle<anyhow::Result<()>>,
}

impl MeshNode {
    /// Bind the peer listener, join the rendezvous and start reconciling.
    ///
    /// Returns once the bootstrap Join has been answered. Failing to reach
    /// the rendezvous is fatal here.
    pub async fn start(config: &MeshConfig) -> Result<Self, MeshError> {
        let bind = format!(
            "{}:{}",
            config.network.listen_host, config.network.listen_port
        );
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| MeshError::Listen {
                addr: bind.clone(),
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| MeshError::Listen { addr: bind, source })?;

        let advertise = config.network.advertise_host.as_str();
        let local = ServerDescriptor::local(Some(advertise), bound);
        tracing::info!(server = %local, "listening for peer links");

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let registry = MembershipRegistry::new(&local.id);
        let links = PeerLinkManager::new(
            local.clone(),
            TcpConnector,
            registry.clone(),
            config.mesh.connect_timeout(),
        );
        let coordinator = MeshCoordinator::new(local.clone(), registry, links);

        let listener_task =
            tokio::spawn(PeerListener::new(listener, shutdown_tx.subscribe()).run());

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let rendezvous =
            match RendezvousClient::new(config.rendezvous.clone(), local.clone(), events_tx)
                .start()
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = shutdown_tx.send(());
                    let _ = listener_task.await;
                    return Err(e);
                }
            };

        let coordinator_task = {
            let coordinator = coordinator.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { coordinator.run(events_rx, shutdown).await })
        };

        Ok(Self {
            local,
            coordinator,
            rendezvous,
            shutdown_tx,
            coordinator_task,
            listener_task,
        })
    }

    pub fn local(&self) -> &ServerDescriptor {
        &self.local
    }

    pub fn registry(&self) -> &MembershipRegistry {
        self.coordinator.registry()
    }

    pub fn links(&self) -> &PeerLinkManager<TcpConnector> {
        self.coordinator.links()
    }

    pub fn coordinator(&self) -> &MeshCoordinator<TcpConnector> {
        &self.coordinator
    }

    /// Stop taking membership events, close every peer link, leave the
    /// rendezvous, then stop the listener.
    pub async fn shutdown(self) {
        tracing::info!(server = %self.local, "mesh node shutting down");

        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.coordinator_task.await {
            tracing::warn!(error = %e, "coordinator task failed");
        }

        self.coordinator.shutdown().await;
        self.rendezvous.leave().await;

        match self.listener_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "peer listener failed"),
            Err(e) => tracing::warn!(error = %e, "peer listener task failed"),
        }
        tracing::info!(server = %self.local, "mesh node stopped");
    }
}
