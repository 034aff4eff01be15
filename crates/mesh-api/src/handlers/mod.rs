//! HTTP API handlers: exposes membership state as JSON.

pub mod status;

use mesh_core::ServerDescriptor;
use mesh_services::{MembershipRegistry, PeerLinkManager, TcpConnector};

#[derive(Clone)]
pub struct ApiState {
    pub local: ServerDescriptor,
    pub registry: MembershipRegistry,
    pub links: PeerLinkManager<TcpConnector>,
    /// Fires the same graceful shutdown as Ctrl-C.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

pub use status::{handle_members, handle_shutdown, handle_status};

#[cfg(test)]
pub(crate) fn test_state() -> (ApiState, tokio::sync::broadcast::Receiver<()>) {
    let local = ServerDescriptor::new("local", "127.0.0.1", 7000);
    let registry = MembershipRegistry::new(&local.id);
    let links = PeerLinkManager::new(
        local.clone(),
        TcpConnector,
        registry.clone(),
        std::time::Duration::from_secs(1),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let state = ApiState {
        local,
        registry,
        links,
        shutdown_tx,
    };
    (state, shutdown_rx)
}
