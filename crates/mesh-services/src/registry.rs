//! Membership registry: the set of remote participants this node knows of.
//!
//! Shared between the coordinator, every peer link and the status API.
//! All writes go through `insert_if_absent` and `remove_if_present`; both are
//! atomic per key, so duplicate or racing notifications are harmless.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use mesh_core::ServerDescriptor;

/// Coordinator state of a known participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Registered, direct link still being opened.
    Joining,
    /// Direct link is up.
    Joined,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub server: ServerDescriptor,
    pub state: MemberState,
    /// When the entry was inserted.
    pub since: Instant,
    // join attempt that owns the entry, 0 when inserted untagged
    attempt: u64,
}

/// Concurrent map from participant id to descriptor.
///
/// Never holds the local id. Cloning shares the underlying map.
#[derive(Clone)]
pub struct MembershipRegistry {
    local_id: Arc<str>,
    members: Arc<DashMap<String, Member>>,
}

impl MembershipRegistry {
    pub fn new(local_id: &str) -> Self {
        Self {
            local_id: Arc::from(local_id),
            members: Arc::new(DashMap::new()),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Insert `server` in the `Joining` state unless its id is already known.
    ///
    /// Returns true iff this call added the entry. Among concurrent callers
    /// for the same id at most one sees true. The local id is never inserted.
    pub fn insert_if_absent(&self, server: &ServerDescriptor) -> bool {
        self.insert_for_attempt(server, 0)
    }

    /// `insert_if_absent`, tagging the entry with the join attempt that owns
    /// it. Only that attempt may later promote or roll back the entry.
    pub fn insert_for_attempt(&self, server: &ServerDescriptor, attempt: u64) -> bool {
        if server.id == *self.local_id {
            return false;
        }
        match self.members.entry(server.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Member {
                    server: server.clone(),
                    state: MemberState::Joining,
                    since: Instant::now(),
                    attempt,
                });
                true
            }
        }
    }

    /// Remove `id`. Returns true iff it was present.
    pub fn remove_if_present(&self, id: &str) -> bool {
        self.members.remove(id).is_some()
    }

    /// Remove `id` only if `attempt` still owns its entry.
    pub fn remove_for_attempt(&self, id: &str, attempt: u64) -> bool {
        self.members
            .remove_if(id, |_, m| m.attempt == attempt)
            .is_some()
    }

    /// Promote a `Joining` entry owned by `attempt` to `Joined`.
    ///
    /// False if the entry is gone or now belongs to a later attempt.
    pub fn mark_joined(&self, id: &str, attempt: u64) -> bool {
        match self.members.get_mut(id) {
            Some(mut member) if member.attempt == attempt => {
                member.state = MemberState::Joined;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, id: &str) -> Option<MemberState> {
        self.members.get(id).map(|m| m.state)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Point-in-time copy of the known descriptors. Diagnostics only; stale
    /// as soon as it returns.
    pub fn snapshot(&self) -> Vec<ServerDescriptor> {
        self.members.iter().map(|e| e.value().server.clone()).collect()
    }

    /// Like `snapshot`, with state and age.
    pub fn members(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&self) {
        self.members.clear();
    }
}
