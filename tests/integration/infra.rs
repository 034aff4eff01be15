//! In-process rendezvous hub.
//!
//! Keeps the membership list, answers `Join` with everyone but the
//! requester and fans `Joined`/`Left` out to every other connection. A
//! connection that drops without a `Leave` is reported as `Left`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use mesh_core::wire::{ClientFrame, HubFrame};
use mesh_core::ServerDescriptor;
use mesh_services::framing::{write_frame, FrameReader};

pub struct TestHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    task: JoinHandle<()>,
}

struct HubState {
    /// id → (owning connection, descriptor)
    members: Mutex<HashMap<String, (u64, ServerDescriptor)>>,
    fanout: broadcast::Sender<(u64, HubFrame)>,
    next_conn: AtomicU64,
}

impl TestHub {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Bind a fresh hub with empty state on `addr`.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind test hub");
        let addr = listener.local_addr().unwrap();
        let (fanout, _) = broadcast::channel(256);
        let state = Arc::new(HubState {
            members: Mutex::new(HashMap::new()),
            fanout,
            next_conn: AtomicU64::new(1),
        });
        let task = tokio::spawn(accept_loop(listener, state.clone()));
        Self { addr, state, task }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Ids currently registered at the hub, sorted.
    pub fn members(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.members.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop the listener and every connection. Returns the address so the
    /// hub can be brought back on the same port.
    pub async fn stop(self) -> SocketAddr {
        self.task.abort();
        let _ = self.task.await;
        self.addr
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<HubState>) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { return };
                let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
                conns.spawn(serve(stream, conn, state.clone()));
            }
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }
}

async fn serve(stream: TcpStream, conn: u64, state: Arc<HubState>) {
    let mut fanout = state.fanout.subscribe();
    let (reader, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(reader);
    let mut announced: Option<String> = None;

    loop {
        tokio::select! {
            frame = reader.read_frame::<ClientFrame>() => match frame {
                Ok(Some(ClientFrame::Join { request_id, server })) => {
                    let servers = state.join(conn, &server);
                    announced = Some(server.id.clone());
                    let reply = HubFrame::JoinReply { request_id, servers };
                    if write_frame(&mut writer, &reply).await.is_err() {
                        break;
                    }
                }
                Ok(Some(ClientFrame::Leave { server })) => {
                    state.depart(conn, &server.id);
                    if announced.as_deref() == Some(server.id.as_str()) {
                        announced = None;
                    }
                }
                Ok(None) | Err(_) => break,
            },

            msg = fanout.recv() => match msg {
                Ok((from, frame)) if from != conn => {
                    if write_frame(&mut writer, &frame).await.is_err() {
                        break;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(id) = announced {
        state.depart(conn, &id);
    }
}

impl HubState {
    /// Register `server` and return everyone else.
    fn join(&self, conn: u64, server: &ServerDescriptor) -> Vec<ServerDescriptor> {
        let others = {
            let mut members = self.members.lock().unwrap();
            let others = members
                .values()
                .filter(|(_, s)| s.id != server.id)
                .map(|(_, s)| s.clone())
                .collect();
            members.insert(server.id.clone(), (conn, server.clone()));
            others
        };
        let _ = self.fanout.send((
            conn,
            HubFrame::Joined {
                server: server.clone(),
            },
        ));
        others
    }

    fn depart(&self, conn: u64, id: &str) {
        let removed = {
            let mut members = self.members.lock().unwrap();
            match members.get(id) {
                Some((owner, _)) if *owner == conn => members.remove(id).map(|(_, s)| s),
                _ => None,
            }
        };
        if let Some(server) = removed {
            let _ = self.fanout.send((conn, HubFrame::Left { server }));
        }
    }
}

/// Register `server` at the hub over a raw connection, without running a
/// node behind it. The registration lasts as long as the returned stream.
pub async fn announce(endpoint: &str, server: &ServerDescriptor) -> FrameReader<TcpStream> {
    let mut stream = TcpStream::connect(endpoint).await.expect("connect to hub");
    write_frame(
        &mut stream,
        &ClientFrame::Join {
            request_id: 1,
            server: server.clone(),
        },
    )
    .await
    .expect("send join");

    let mut reader = FrameReader::new(stream);
    loop {
        match reader.read_frame::<HubFrame>().await.expect("hub reply") {
            Some(HubFrame::JoinReply { .. }) => return reader,
            Some(_) => continue,
            None => panic!("hub closed before replying"),
        }
    }
}
