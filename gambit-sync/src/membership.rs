//! Attaching connections to rooms and detaching them again.
//!
//! Leave policy: once fewer than two members remain the room goes back to
//! the starting position with both seats free, and the survivors get the
//! fresh snapshot. A room with no members left is retired and dropped from
//! the registry.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::broadcast::PeerHandle;
use crate::protocol::SnapshotView;
use crate::registry::SessionRegistry;
use crate::room::RoomKey;

/// Transport-side state of one client connection.
#[derive(Debug)]
pub struct Connection {
    peer: PeerHandle,
    room: Option<RoomKey>,
}

impl Connection {
    pub fn new(peer: PeerHandle) -> Self {
        Self { peer, room: None }
    }

    pub fn id(&self) -> Uuid {
        self.peer.id()
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Room this connection is attached to, if any.
    pub fn room(&self) -> Option<&RoomKey> {
        self.room.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("room {room} is full ({max} members)")]
    RoomFull { room: RoomKey, max: usize },
}

/// What a leave did to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: RoomKey,
    pub remaining: usize,
    pub reset: bool,
    pub removed: bool,
}

pub struct MembershipManager {
    registry: Arc<SessionRegistry>,
    max_members: usize,
}

impl MembershipManager {
    pub fn new(registry: Arc<SessionRegistry>, max_members: usize) -> Self {
        Self {
            registry,
            max_members: max_members.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Attach `conn` to `key` and return the room's snapshot.
    ///
    /// Joining the room the connection is already in only refreshes the
    /// snapshot. Joining a different room leaves the old one once the new
    /// one has accepted the connection; a refused join changes nothing.
    pub async fn join(
        &self,
        conn: &mut Connection,
        key: RoomKey,
    ) -> Result<SnapshotView, JoinError> {
        let snapshot = loop {
            let room = self.registry.resolve(&key).await;
            let mut guard = room.lock().await;

            if guard.is_retired() {
                // Emptied between lookup and lock; clear it and start over.
                drop(guard);
                self.registry.remove(&key, &room).await;
                continue;
            }

            if !guard.has_member(&conn.id()) && guard.member_count() >= self.max_members {
                return Err(JoinError::RoomFull {
                    room: key,
                    max: self.max_members,
                });
            }

            if guard.attach(conn.peer.clone()) {
                log::info!(
                    "Peer {} joined room {key} ({} online)",
                    conn.id(),
                    guard.member_count()
                );
            }
            break guard.snapshot();
        };

        if conn.room.as_ref().is_some_and(|current| *current != key) {
            self.leave(conn).await;
        }
        conn.room = Some(key);
        Ok(snapshot)
    }

    /// Detach `conn` from its room. `None` if it was not attached.
    pub async fn leave(&self, conn: &mut Connection) -> Option<LeaveOutcome> {
        let key = conn.room.take()?;
        let Some(room) = self.registry.get(&key).await else {
            log::warn!("Peer {} left unknown room {key}", conn.id());
            return None;
        };

        let mut guard = room.lock().await;
        guard.detach(&conn.id());
        let remaining = guard.member_count();
        log::info!("Peer {} left room {key} ({remaining} online)", conn.id());

        let reset = remaining < 2;
        if reset {
            guard.reset();
            match guard.snapshot().encode() {
                Ok(text) => {
                    guard.broadcast(&Arc::from(text));
                }
                Err(e) => log::error!("Failed to encode reset snapshot for room {key}: {e}"),
            }
            log::debug!("Room {key} reset");
        }

        let removed = remaining == 0;
        if removed {
            guard.retire();
        }
        drop(guard);

        if removed && self.registry.remove(&key, &room).await {
            log::info!("Room {key} deleted");
        }

        Some(LeaveOutcome {
            room: key,
            remaining,
            reset,
            removed,
        })
    }
}
