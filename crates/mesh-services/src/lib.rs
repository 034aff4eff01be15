//! mesh-services: membership registry, peer links, rendezvous client and
//! the coordinator that ties them together.

pub mod coordinator;
pub mod framing;
pub mod link;
pub mod listener;
pub mod node;
pub mod registry;
pub mod rendezvous;

#[cfg(test)]
mod testing;

pub use coordinator::{JoinOutcome, MeshCoordinator, MeshEvent};
pub use link::{Connector, LinkInfo, PeerLinkManager, TcpConnector};
pub use listener::PeerListener;
pub use node::MeshNode;
pub use registry::{Member, MemberState, MembershipRegistry};
pub use rendezvous::{RendezvousClient, RendezvousHandle};
