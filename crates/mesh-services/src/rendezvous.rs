//! Rendezvous client: bridges the coordinator to the shared hub.
//!
//! On start the client joins the hub and forwards the membership snapshot it
//! gets back. From then on it relays `Joined`/`Left` broadcasts. When the hub
//! connection drops it reconnects, joins again and forwards the fresh
//! snapshot through the exact same path: broadcasts sent while we were away
//! are gone, and only a new snapshot restores a complete view.

use std::io;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use mesh_core::config::RendezvousConfig;
use mesh_core::wire::{ClientFrame, HubFrame};
use mesh_core::{MeshError, ServerDescriptor};

use crate::coordinator::MeshEvent;
use crate::framing::{write_frame, FrameReader};

const LEAVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Hub frame with its server entries not yet validated.
type RawFrame = HubFrame<Value>;

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// One connection to the hub.
struct Session {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl Session {
    async fn connect(endpoint: &str, timeout: Duration) -> io::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| timed_out("connect"))??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(reader),
            writer,
            next_request_id: 1,
        })
    }

    /// Issue `Join(local)` and wait for the matching reply. Broadcasts that
    /// arrive in between are forwarded as usual.
    async fn join(
        &mut self,
        local: &ServerDescriptor,
        events: &mpsc::Sender<MeshEvent>,
        timeout: Duration,
    ) -> io::Result<Vec<ServerDescriptor>> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        write_frame(
            &mut self.writer,
            &ClientFrame::Join {
                request_id,
                server: local.clone(),
            },
        )
        .await?;

        let reply = async {
            loop {
                match self.reader.read_frame::<RawFrame>().await {
                    Ok(None) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "hub closed the connection during join",
                        ))
                    }
                    Ok(Some(HubFrame::JoinReply {
                        request_id: r,
                        servers,
                    })) if r == request_id => return Ok(servers),
                    Ok(Some(frame)) => forward(frame, local, events).await,
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => skipped(&e),
                    Err(e) => return Err(e),
                }
            }
        };

        let servers = tokio::time::timeout(timeout, reply)
            .await
            .map_err(|_| timed_out("join"))??;
        Ok(servers
            .into_iter()
            .filter_map(admit)
            .filter(|s| s.id != local.id)
            .collect())
    }

    /// Relay broadcasts until the connection ends. Always returns an error
    /// describing why.
    async fn pump(
        &mut self,
        local: &ServerDescriptor,
        events: &mpsc::Sender<MeshEvent>,
    ) -> io::Error {
        loop {
            match self.reader.read_frame::<RawFrame>().await {
                Ok(Some(frame)) => forward(frame, local, events).await,
                Ok(None) => {
                    return io::Error::new(io::ErrorKind::UnexpectedEof, "hub closed the connection")
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => skipped(&e),
                Err(e) => return e,
            }
        }
    }

    async fn leave(mut self, local: &ServerDescriptor) {
        let frame = ClientFrame::Leave {
            server: local.clone(),
        };
        match tokio::time::timeout(LEAVE_TIMEOUT, write_frame(&mut self.writer, &frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "failed to announce departure"),
            Err(_) => tracing::debug!("announcing departure timed out"),
        }
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut self.writer).await;
    }
}

fn skipped(error: &io::Error) {
    tracing::warn!(error = %error, "skipping malformed hub frame");
}

/// Validate one announced server. Invalid entries are logged and dropped so
/// that the rest of the frame still counts.
fn admit(entry: Value) -> Option<ServerDescriptor> {
    match ServerDescriptor::deserialize(&entry) {
        Ok(server) => Some(server),
        Err(e) => {
            tracing::warn!(entry = %entry, error = %e, "dropping invalid server announcement");
            None
        }
    }
}

async fn forward(frame: RawFrame, local: &ServerDescriptor, events: &mpsc::Sender<MeshEvent>) {
    let (entry, event): (Value, fn(ServerDescriptor) -> MeshEvent) = match frame {
        HubFrame::Joined { server } => (server, MeshEvent::Joined),
        HubFrame::Left { server } => (server, MeshEvent::Left),
        HubFrame::JoinReply { request_id, .. } => {
            tracing::debug!(request_id, "ignoring stale join reply");
            return;
        }
    };
    let server = match admit(entry) {
        Some(server) if server.id != local.id => server,
        _ => return,
    };
    if events.send(event(server)).await.is_err() {
        tracing::trace!("coordinator gone, dropping membership event");
    }
}

/// Connects to the hub and feeds `MeshEvent`s to the coordinator.
pub struct RendezvousClient {
    config: RendezvousConfig,
    local: ServerDescriptor,
    events: mpsc::Sender<MeshEvent>,
}

impl RendezvousClient {
    pub fn new(
        config: RendezvousConfig,
        local: ServerDescriptor,
        events: mpsc::Sender<MeshEvent>,
    ) -> Self {
        Self {
            config,
            local,
            events,
        }
    }

    /// Join the hub and queue the bootstrap snapshot.
    ///
    /// Fails with `RendezvousUnavailable` if the hub cannot be reached or the
    /// Join handshake does not complete.
    pub async fn start(self) -> Result<RendezvousHandle, MeshError> {
        let endpoint = self.config.endpoint.clone();
        let timeout = self.config.request_timeout();

        let mut session = Session::connect(&endpoint, timeout)
            .await
            .map_err(|e| MeshError::rendezvous(&endpoint, e))?;
        let servers = session
            .join(&self.local, &self.events, timeout)
            .await
            .map_err(|e| MeshError::rendezvous(&endpoint, e))?;

        tracing::info!(endpoint = %endpoint, servers = servers.len(), "joined rendezvous");
        if self.events.send(MeshEvent::Snapshot(servers)).await.is_err() {
            tracing::warn!("coordinator gone before bootstrap snapshot");
        }

        let (leave_tx, leave_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(session, leave_rx));
        Ok(RendezvousHandle { leave_tx, task })
    }

    async fn run(self, mut session: Session, mut leave_rx: oneshot::Receiver<()>) {
        loop {
            let error = tokio::select! {
                biased;
                requested = &mut leave_rx => {
                    if requested.is_ok() {
                        session.leave(&self.local).await;
                        tracing::info!(endpoint = %self.config.endpoint, "left rendezvous");
                    } else {
                        tracing::debug!("rendezvous handle dropped, disconnecting");
                    }
                    return;
                }
                e = session.pump(&self.local, &self.events) => e,
            };

            tracing::warn!(
                endpoint = %self.config.endpoint,
                error = %error,
                "rendezvous connection lost, reconnecting"
            );

            session = match self.reconnect(&mut leave_rx).await {
                Some(session) => session,
                None => return,
            };
        }
    }

    /// Retry until joined again, or until asked to leave (`None`).
    async fn reconnect(&self, leave_rx: &mut oneshot::Receiver<()>) -> Option<Session> {
        let endpoint = &self.config.endpoint;
        let timeout = self.config.request_timeout();
        let mut attempt = 0;

        loop {
            let delay = self.config.reconnect_delay(attempt);
            attempt += 1;

            let rejoin = async {
                tokio::time::sleep(delay).await;
                let mut session = Session::connect(endpoint, timeout).await?;
                let servers = session.join(&self.local, &self.events, timeout).await?;
                Ok::<_, io::Error>((session, servers))
            };

            let result = tokio::select! {
                biased;
                _ = &mut *leave_rx => return None,
                r = rejoin => r,
            };

            match result {
                Ok((session, servers)) => {
                    tracing::info!(
                        endpoint = %endpoint,
                        attempt,
                        servers = servers.len(),
                        "reconnected to rendezvous, resynchronizing"
                    );
                    if self.events.send(MeshEvent::Snapshot(servers)).await.is_err() {
                        tracing::trace!("coordinator gone, dropping snapshot");
                    }
                    return Some(session);
                }
                Err(e) => tracing::warn!(
                    endpoint = %endpoint,
                    attempt,
                    error = %e,
                    "rendezvous reconnect failed"
                ),
            }
        }
    }
}

/// Keeps the client running. Dropping it disconnects without a `Leave`.
pub struct RendezvousHandle {
    leave_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RendezvousHandle {
    /// Announce departure, disconnect, and wait for the client to stop.
    pub async fn leave(self) {
        let _ = self.leave_tx.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "rendezvous client task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
