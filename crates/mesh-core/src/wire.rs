//! Mesh wire format: frames exchanged with the rendezvous hub and with peers.
//!
//! Every frame is one JSON object on one line. The framing is deliberately
//! dumb: the hub and the peer transport are replaceable collaborators, and
//! nothing in the membership logic depends on how frames are encoded.

use serde::{Deserialize, Serialize};

use crate::descriptor::ServerDescriptor;

/// Longest line accepted from the network, newline excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

// ── Rendezvous ───────────────────────────────────────────────────────────────

/// Frames a mesh participant sends to the rendezvous hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Announce arrival. The hub answers with a `JoinReply` carrying the
    /// same `request_id` and broadcasts `Joined` to everyone else.
    Join {
        request_id: u64,
        server: ServerDescriptor,
    },
    /// Announce departure. No reply.
    Leave { server: ServerDescriptor },
}

/// Frames the rendezvous hub sends to a participant.
///
/// Generic over the entry type so a client can decode the envelope first and
/// validate each announced server on its own (`HubFrame<serde_json::Value>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame<S = ServerDescriptor> {
    /// Full membership as known to the hub, excluding the requester.
    JoinReply { request_id: u64, servers: Vec<S> },
    /// Another participant joined.
    Joined { server: S },
    /// Another participant left. Best effort.
    Left { server: S },
}

// ── Peer links ───────────────────────────────────────────────────────────────

/// Frames exchanged on a direct peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerFrame {
    /// First frame written by the dialling side.
    Hello { server: ServerDescriptor },
}

// ── Encoding ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds limit of {MAX_FRAME_LEN}")]
    TooLong(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a frame as a single newline-terminated line.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, WireError> {
    let mut line = serde_json::to_vec(frame)?;
    if line.len() > MAX_FRAME_LEN {
        return Err(WireError::TooLong(line.len()));
    }
    line.push(b'\n');
    Ok(line)
}

/// Decode one line (with or without its trailing newline).
pub fn decode<'a, T: Deserialize<'a>>(line: &'a [u8]) -> Result<T, WireError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() > MAX_FRAME_LEN {
        return Err(WireError::TooLong(line.len()));
    }
    Ok(serde_json::from_slice(line)?)
}
