//! /status, /members, /daemon/shutdown handlers.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mesh_services::MemberState;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub local: LocalInfo,
    pub members: usize,
    pub joining: usize,
    pub links: usize,
}

#[derive(Debug, Serialize)]
pub struct LocalInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let members = state.registry.members();
    let joining = members
        .iter()
        .filter(|m| m.state == MemberState::Joining)
        .count();

    Json(StatusResponse {
        local: LocalInfo {
            id: state.local.id.clone(),
            host: state.local.host.clone(),
            port: state.local.port,
        },
        members: members.len(),
        joining,
        links: state.links.len(),
    })
}

// ── /members ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Serialize)]
pub struct MemberInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: String,
    pub linked: bool,
    /// Seconds since the outbound link came up.
    pub link_secs: Option<u64>,
    pub age_secs: u64,
}

pub async fn handle_members(State(state): State<ApiState>) -> Json<MembersResponse> {
    let links: HashMap<String, u64> = state
        .links
        .links()
        .into_iter()
        .map(|l| (l.server.id, l.connected_at.elapsed().as_secs()))
        .collect();

    let mut members: Vec<MemberInfo> = state
        .registry
        .members()
        .into_iter()
        .map(|m| MemberInfo {
            linked: links.contains_key(&m.server.id),
            link_secs: links.get(&m.server.id).copied(),
            state: format!("{:?}", m.state),
            age_secs: m.since.elapsed().as_secs(),
            id: m.server.id,
            host: m.server.host,
            port: m.server.port,
        })
        .collect();
    members.sort_by(|a, b| a.id.cmp(&b.id));

    Json(MembersResponse { members })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");

    let message = match state.shutdown_tx.send(()) {
        Ok(_) => "Shutdown initiated",
        Err(_) => "Shutdown already in progress",
    };

    Json(ShutdownResponse {
        message: message.to_string(),
    })
}
