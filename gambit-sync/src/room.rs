//! Per-room game state.
//!
//! A `Room` is plain data; callers serialize access through the mutex the
//! registry wraps it in. Every mutation (history append, seat claim,
//! membership change) and the broadcast that follows it happen under that
//! one lock, so members observe them in mutation order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::broadcast::{fan_out, BroadcastStats, FanOut, PeerHandle};
use crate::protocol::{Role, RolesView, SnapshotView, START_POSITION};

/// Validated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(Arc<str>);

/// Reasons a room identifier is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("room identifier is empty")]
    Empty,
    #[error("room identifier is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("room identifier contains control characters")]
    ControlCharacter,
}

impl RoomKey {
    /// Validate a raw identifier. The key is kept byte-for-byte, so
    /// `"r1"` and `" r1"` name different rooms.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, RoomKeyError> {
        if raw.is_empty() {
            return Err(RoomKeyError::Empty);
        }
        if raw.len() > max_len {
            return Err(RoomKeyError::TooLong {
                len: raw.len(),
                max: max_len,
            });
        }
        if raw.chars().any(char::is_control) {
            return Err(RoomKeyError::ControlCharacter);
        }
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sits in which seat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignments {
    white: Option<String>,
    black: Option<String>,
}

impl RoleAssignments {
    pub fn holder(&self, role: Role) -> Option<&str> {
        match role {
            Role::White => self.white.as_deref(),
            Role::Black => self.black.as_deref(),
        }
    }

    /// Seat `name` in `role` if the seat is free and `name` is not already
    /// in the other seat. Returns whether the claim took effect.
    pub fn claim(&mut self, role: Role, name: &str) -> bool {
        if self.holder(role).is_some() || self.holder(role.opposite()) == Some(name) {
            return false;
        }
        let seat = match role {
            Role::White => &mut self.white,
            Role::Black => &mut self.black,
        };
        *seat = Some(name.to_string());
        true
    }

    pub fn clear(&mut self) {
        self.white = None;
        self.black = None;
    }

    pub fn view(&self) -> RolesView {
        RolesView {
            white: self.white.clone(),
            black: self.black.clone(),
        }
    }
}

/// State of one game session.
#[derive(Debug)]
pub struct Room {
    key: RoomKey,
    /// Never empty; index 0 is the seed
    history: Vec<String>,
    last_update: Option<Value>,
    roles: RoleAssignments,
    members: HashMap<Uuid, PeerHandle>,
    stats: BroadcastStats,
    /// Set once the room emptied and is on its way out of the registry
    retired: bool,
}

impl Room {
    /// A fresh room seeded with the starting position.
    pub fn new(key: RoomKey) -> Self {
        Self {
            key,
            history: vec![START_POSITION.to_string()],
            last_update: None,
            roles: RoleAssignments::default(),
            members: HashMap::new(),
            stats: BroadcastStats::default(),
            retired: false,
        }
    }

    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn current_position(&self) -> &str {
        self.history.last().map(String::as_str).unwrap_or(START_POSITION)
    }

    pub fn last_update(&self) -> Option<&Value> {
        self.last_update.as_ref()
    }

    pub fn roles(&self) -> &RoleAssignments {
        &self.roles
    }

    /// Record a position update.
    ///
    /// The position is appended only if it is not already in the history.
    /// `message` becomes the last update either way. Returns whether the
    /// history grew.
    pub fn record_position(&mut self, position: String, message: Value) -> bool {
        let appended = !self.history.contains(&position);
        if appended {
            self.history.push(position);
            log::debug!("Room {} history depth {}", self.key, self.history.len());
        }
        self.last_update = Some(message);
        appended
    }

    pub fn claim_role(&mut self, role: Role, name: &str) -> bool {
        self.roles.claim(role, name)
    }

    /// Back to the seed position with no seats taken.
    pub fn reset(&mut self) {
        self.history.truncate(1);
        self.last_update = None;
        self.roles.clear();
    }

    pub fn snapshot(&self) -> SnapshotView {
        let roles = self.roles.view();
        let (previous, current, last_update) = match self.history.as_slice() {
            [.., previous, current] => {
                (previous.clone(), current.clone(), self.last_update.clone())
            }
            _ => {
                let seed = self.current_position().to_string();
                (seed.clone(), seed, None)
            }
        };
        SnapshotView {
            last_update,
            previous,
            current,
            online: self.members.len(),
            white: roles.white,
            black: roles.black,
        }
    }

    /// Add a member. Returns false if it was already attached.
    pub fn attach(&mut self, peer: PeerHandle) -> bool {
        if self.members.contains_key(&peer.id()) {
            return false;
        }
        self.members.insert(peer.id(), peer);
        true
    }

    pub fn detach(&mut self, peer_id: &Uuid) -> Option<PeerHandle> {
        self.members.remove(peer_id)
    }

    pub fn has_member(&self, peer_id: &Uuid) -> bool {
        self.members.contains_key(peer_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Fan `message` out to every open member.
    pub fn broadcast(&mut self, message: &Arc<str>) -> FanOut {
        let result = fan_out(self.members.values(), message);
        self.stats.record(&result);
        result
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}
