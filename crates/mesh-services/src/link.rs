//! Peer links: one supervised outbound connection per known participant.
//!
//! A link lives from a successful `open` until either side closes it. Its
//! end runs the close callback exactly once: the participant is removed from
//! the membership registry. That callback is the only place connection loss
//! turns into a membership change.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use mesh_core::wire::PeerFrame;
use mesh_core::{ConnectionError, ServerDescriptor};

use crate::framing::write_frame;
use crate::registry::MembershipRegistry;

/// Opens byte streams to participants.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
        server: &ServerDescriptor,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP to `server.host:server.port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(
        &self,
        server: &ServerDescriptor,
    ) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = server.addr();
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

struct LinkHandle {
    link_id: u64,
    server: ServerDescriptor,
    connected_at: Instant,
    close_tx: oneshot::Sender<()>,
    // resolves (with an error) once the supervisor has run the close callback
    done_rx: oneshot::Receiver<()>,
}

impl LinkHandle {
    async fn close(self) {
        let _ = self.close_tx.send(());
        let _ = self.done_rx.await;
    }
}

/// A live link, as reported to diagnostics.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub server: ServerDescriptor,
    pub connected_at: Instant,
}

struct Inner<C> {
    local: ServerDescriptor,
    connector: C,
    registry: MembershipRegistry,
    connect_timeout: Duration,
    links: DashMap<String, LinkHandle>,
    next_link_id: AtomicU64,
    closed: AtomicBool,
}

/// Owns every outbound peer link. Cloning shares the same set of links.
pub struct PeerLinkManager<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for PeerLinkManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> PeerLinkManager<C> {
    pub fn new(
        local: ServerDescriptor,
        connector: C,
        registry: MembershipRegistry,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                connector,
                registry,
                connect_timeout,
                links: DashMap::new(),
                next_link_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to `server` and supervise the resulting link.
    ///
    /// Opening an id that already has a live link is a no-op. The future can
    /// be dropped at any point before it resolves without leaving a link
    /// behind.
    pub async fn open(&self, server: &ServerDescriptor) -> Result<(), ConnectionError> {
        if self.inner.links.contains_key(&server.id) {
            tracing::debug!(server = %server, "link already open");
            return Ok(());
        }

        let connect = self.inner.connector.connect(server);
        let stream = match tokio::time::timeout(self.inner.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectionError::new(server, e)),
            Err(_) => {
                return Err(ConnectionError::new(
                    server,
                    io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                ))
            }
        };

        let (reader, mut writer) = tokio::io::split(stream);
        let hello = PeerFrame::Hello {
            server: self.inner.local.clone(),
        };
        match tokio::time::timeout(self.inner.connect_timeout, write_frame(&mut writer, &hello))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectionError::new(server, e)),
            Err(_) => {
                return Err(ConnectionError::new(
                    server,
                    io::Error::new(io::ErrorKind::TimedOut, "hello timed out"),
                ))
            }
        }

        // No awaits from here on: the link is either fully registered or not
        // at all.
        let link_id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (close_tx, close_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        match self.inner.links.entry(server.id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(server = %server, "link opened concurrently, dropping duplicate");
                return Ok(());
            }
            Entry::Vacant(slot) => {
                slot.insert(LinkHandle {
                    link_id,
                    server: server.clone(),
                    connected_at: Instant::now(),
                    close_tx,
                    done_rx,
                });
            }
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner
                .links
                .remove_if(&server.id, |_, h| h.link_id == link_id);
            return Err(ConnectionError::new(
                server,
                io::Error::new(io::ErrorKind::Interrupted, "link manager shut down"),
            ));
        }

        tracing::info!(server = %server, "connected to server");

        tokio::spawn(supervise(
            self.inner.clone(),
            server.clone(),
            link_id,
            reader,
            writer,
            close_rx,
            done_tx,
        ));
        Ok(())
    }

    /// Tear down the link to `id` and wait for its close callback.
    ///
    /// Returns false if there was no live link. Safe to call repeatedly.
    pub async fn close(&self, id: &str) -> bool {
        match self.inner.links.remove(id) {
            Some((_, handle)) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every link and refuse new ones. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.inner.links.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<LinkHandle> = ids
            .iter()
            .filter_map(|id| self.inner.links.remove(id).map(|(_, h)| h))
            .collect();
        let count = handles.len();
        futures::future::join_all(handles.into_iter().map(LinkHandle::close)).await;
        count
    }

    pub fn is_linked(&self, id: &str) -> bool {
        self.inner.links.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.links.is_empty()
    }

    pub fn links(&self) -> Vec<LinkInfo> {
        self.inner
            .links
            .iter()
            .map(|e| LinkInfo {
                server: e.value().server.clone(),
                connected_at: e.value().connected_at,
            })
            .collect()
    }
}

enum CloseReason {
    Local,
    Remote(io::Result<()>),
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<()> {
    let mut buf = [0u8; 512];
    loop {
        if reader.read(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}

async fn supervise<C, R, W>(
    inner: Arc<Inner<C>>,
    server: ServerDescriptor,
    link_id: u64,
    reader: R,
    writer: W,
    mut close_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    let reason = tokio::select! {
        _ = &mut close_rx => CloseReason::Local,
        r = drain(reader) => CloseReason::Remote(r),
    };
    drop(writer);

    match &reason {
        CloseReason::Local => tracing::debug!(server = %server, "link closed locally"),
        CloseReason::Remote(Ok(())) => tracing::debug!(server = %server, "link closed by peer"),
        CloseReason::Remote(Err(e)) => {
            tracing::debug!(server = %server, error = %e, "link failed")
        }
    }

    inner.links.remove_if(&server.id, |_, h| h.link_id == link_id);
    if inner.registry.remove_if_present(&server.id) {
        tracing::info!(server = %server, "disconnected from server");
    }
    drop(done_tx);
}
