//! Error kinds surfaced by the membership core.

use crate::descriptor::ServerDescriptor;

/// Failure to establish or keep a direct link to a known peer.
///
/// Always contained: the coordinator rolls the peer back to unknown and logs
/// it. Never terminates the process.
#[derive(Debug, thiserror::Error)]
#[error("connection to {server} failed: {source}")]
pub struct ConnectionError {
    pub server: ServerDescriptor,
    #[source]
    pub source: std::io::Error,
}

impl ConnectionError {
    pub fn new(server: &ServerDescriptor, source: std::io::Error) -> Self {
        Self {
            server: server.clone(),
            source,
        }
    }

    pub fn kind(&self) -> std::io::ErrorKind {
        self.source.kind()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The rendezvous endpoint could not be reached, or the Join handshake
    /// did not complete. Fatal during startup.
    #[error("rendezvous endpoint {endpoint} unavailable: {reason}")]
    RendezvousUnavailable { endpoint: String, reason: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to bind peer listener on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl MeshError {
    pub fn rendezvous(endpoint: &str, reason: impl std::fmt::Display) -> Self {
        Self::RendezvousUnavailable {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}
