//! Inbound peer link listener.
//!
//! Accepts the links other participants open towards this node. Inbound
//! links are passive: they are logged and held open, and they never touch
//! the membership registry. Membership is driven by rendezvous events only.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use mesh_core::wire::PeerFrame;

use crate::framing::FrameReader;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PeerListener {
    listener: TcpListener,
    shutdown: broadcast::Receiver<()>,
}

impl PeerListener {
    pub fn new(listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Self {
        Self { listener, shutdown }
    }

    /// Accept until shutdown, then drop every inbound link so the dialling
    /// side observes the close.
    pub async fn run(mut self) -> Result<()> {
        let mut inbound = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let open = inbound.len();
                    inbound.shutdown().await;
                    tracing::info!(inbound = open, "peer listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let _ = stream.set_nodelay(true);
                            inbound.spawn(serve_inbound(stream, addr));
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }

                Some(_) = inbound.join_next(), if !inbound.is_empty() => {}
            }
        }
    }
}

async fn serve_inbound(stream: TcpStream, addr: SocketAddr) {
    let mut reader = FrameReader::new(stream);

    let server = match tokio::time::timeout(HELLO_TIMEOUT, reader.read_frame::<PeerFrame>()).await
    {
        Ok(Ok(Some(PeerFrame::Hello { server }))) => server,
        Ok(Ok(None)) => {
            tracing::debug!(%addr, "inbound link closed before hello");
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(%addr, error = %e, "bad hello on inbound link");
            return;
        }
        Err(_) => {
            tracing::warn!(%addr, "no hello on inbound link, dropping");
            return;
        }
    };

    tracing::info!(server = %server, %addr, "inbound link from server");

    loop {
        match reader.read_frame::<PeerFrame>().await {
            Ok(Some(frame)) => tracing::trace!(server = %server, ?frame, "inbound frame"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "inbound link error");
                break;
            }
        }
    }

    tracing::info!(server = %server, "inbound link closed");
}
