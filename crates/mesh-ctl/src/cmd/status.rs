//! Daemon status, membership and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    local: LocalInfo,
    members: usize,
    joining: usize,
    links: usize,
}

#[derive(Deserialize)]
struct LocalInfo {
    id: String,
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct MembersResponse {
    members: Vec<MemberInfo>,
}

#[derive(Deserialize)]
struct MemberInfo {
    id: String,
    host: String,
    port: u16,
    state: String,
    link_secs: Option<u64>,
    age_secs: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Mesh Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Server id     : {}", resp.local.id);
    println!("  Address       : {}:{}", resp.local.host, resp.local.port);
    println!("  Members       : {}", resp.members);
    println!("  Still joining : {}", resp.joining);
    println!("  Peer links    : {}", resp.links);

    Ok(())
}

pub async fn cmd_members(port: u16) -> Result<()> {
    let resp: MembersResponse = get_json(&format!("{}/members", base_url(port))).await?;

    if resp.members.is_empty() {
        println!("No other participants known.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Members ({})", resp.members.len());
    println!("═══════════════════════════════════════");

    for m in &resp.members {
        println!("  ┌─ {}", short_id(&m.id));
        println!("  │  addr   : {}:{}", m.host, m.port);
        println!("  │  state  : {}", m.state);
        match m.link_secs {
            Some(secs) => println!("  │  linked : yes, {}s", secs),
            None => println!("  │  linked : no"),
        }
        println!("  └─ age    : {}s", m.age_secs);
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(16) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
