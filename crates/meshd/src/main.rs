//! meshd: peer mesh membership daemon.

use std::time::Duration;

use anyhow::{Context, Result};

use mesh_core::config::MeshConfig;
use mesh_services::{MeshNode, MembershipRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });

    if let Some(endpoint) = std::env::args().nth(1) {
        config.rendezvous.endpoint = endpoint;
    }
    tracing::info!(rendezvous = %config.rendezvous.endpoint, "meshd starting");

    let node = MeshNode::start(&config)
        .await
        .context("failed to join the mesh")?;
    tracing::info!(server = %node.local(), members = node.registry().len(), "joined mesh");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let api_task = config.api.enabled.then(|| {
        let state = mesh_api::ApiState {
            local: node.local().clone(),
            registry: node.registry().clone(),
            links: node.links().clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        mesh_api::spawn(state, config.api.port)
    });

    let membership_printer = {
        let registry = node.registry().clone();
        let every = config.mesh.snapshot_log_secs;
        tokio::spawn(async move {
            if every == 0 {
                std::future::pending::<()>().await;
            }
            let mut interval = tokio::time::interval(Duration::from_secs(every));
            loop {
                interval.tick().await;
                print_membership(&registry);
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    // the API going away is not a reason to leave the mesh
    let _ = shutdown_rx.recv().await;
    tracing::info!("shutting down");

    membership_printer.abort();
    if let Some(api_task) = api_task {
        api_task.abort();
    }
    node.shutdown().await;

    Ok(())
}

fn print_membership(registry: &MembershipRegistry) {
    let mut members = registry.members();
    members.sort_by(|a, b| a.server.id.cmp(&b.server.id));

    tracing::info!(count = members.len(), "membership snapshot");
    for m in members {
        tracing::info!(
            server = %m.server,
            state = ?m.state,
            age_secs = m.since.elapsed().as_secs(),
            "  member"
        );
    }
}
