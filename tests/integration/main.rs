//! Mesh integration test harness.
//!
//! Every test runs real nodes on loopback against an in-process rendezvous
//! hub (see `infra`). Nothing needs root and tests do not share ports:
//! each hub and node binds an OS-assigned port.
//!
//!   cargo test --test integration
//!
//! Each test shuts down the nodes it starts.

use std::time::Duration;

use mesh_core::config::MeshConfig;
use mesh_services::MeshNode;

mod infra;
mod membership;
mod reconnect;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for any convergence wait.
pub const CONVERGE: Duration = Duration::from_secs(5);

/// Node config pointing at `endpoint`, with the status API off and a fixed
/// reconnect delay short enough for tests.
pub fn node_config(endpoint: &str) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.network.listen_host = "127.0.0.1".to_string();
    config.network.listen_port = 0;
    config.rendezvous.endpoint = endpoint.to_string();
    config.rendezvous.request_timeout_ms = 2_000;
    config.rendezvous.reconnect_delays_ms = vec![300];
    config.mesh.connect_timeout_ms = 1_000;
    config.mesh.snapshot_log_secs = 0;
    config.api.enabled = false;
    config
}

pub async fn start_node(endpoint: &str) -> MeshNode {
    MeshNode::start(&node_config(endpoint))
        .await
        .expect("node should join the mesh")
}

/// Poll `cond` until it holds, failing the test after `CONVERGE`.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + CONVERGE;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Ids known to `node`, sorted.
pub fn member_ids(node: &MeshNode) -> Vec<String> {
    let mut ids: Vec<String> = node.registry().snapshot().into_iter().map(|s| s.id).collect();
    ids.sort();
    ids
}

/// True when `node` knows exactly `peers` and holds a live link to each.
pub fn converged(node: &MeshNode, peers: &[&MeshNode]) -> bool {
    let mut want: Vec<String> = peers.iter().map(|p| p.local().id.clone()).collect();
    want.sort();
    member_ids(node) == want
        && node.links().len() == peers.len()
        && peers.iter().all(|p| node.links().is_linked(&p.local().id))
}
