//! In-memory connector and helpers shared by the unit tests.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::io::DuplexStream;

use mesh_core::wire::PeerFrame;
use mesh_core::ServerDescriptor;

use crate::framing::FrameReader;
use crate::link::Connector;

#[derive(Default)]
struct MemoryInner {
    calls: DashMap<String, usize>,
    refused: DashSet<String>,
    hanging: DashSet<String>,
    // far ends of established streams, held until a test drops them
    remotes: DashMap<String, DuplexStream>,
    delay: std::sync::Mutex<Duration>,
}

/// Connector backed by `tokio::io::duplex` pairs.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect to `id` fails with `ConnectionRefused`.
    pub fn refuse(&self, id: &str) {
        self.inner.refused.insert(id.to_string());
    }

    /// Every connect to `id` never completes.
    pub fn hang(&self, id: &str) {
        self.inner.hanging.insert(id.to_string());
    }

    /// Delay applied to every connect before it resolves.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, id: &str) -> usize {
        self.inner.calls.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Simulate the peer going away: drop the far end of the stream.
    pub fn drop_remote(&self, id: &str) -> bool {
        self.inner.remotes.remove(id).is_some()
    }

    /// Read the hello frame the link wrote, keeping the stream alive.
    pub async fn read_hello(&self, id: &str) -> Option<ServerDescriptor> {
        let (key, remote) = self.inner.remotes.remove(id)?;
        let mut reader = FrameReader::new(remote);
        let frame = reader.read_frame::<PeerFrame>().await.ok().flatten();
        self.inner.remotes.insert(key, reader.into_inner());
        frame.map(|PeerFrame::Hello { server }| server)
    }
}

impl Connector for MemoryConnector {
    type Stream = DuplexStream;

    fn connect(
        &self,
        server: &ServerDescriptor,
    ) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let inner = self.inner.clone();
        let id = server.id.clone();
        async move {
            *inner.calls.entry(id.clone()).or_insert(0) += 1;

            let delay = *inner.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if inner.hanging.contains(&id) {
                std::future::pending::<()>().await;
            }
            if inner.refused.contains(&id) {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }

            let (local, remote) = tokio::io::duplex(4096);
            inner.remotes.insert(id, remote);
            Ok(local)
        }
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
