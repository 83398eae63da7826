//! Dispatches inbound frames to the room they belong to.
//!
//! Joins are answered to the sender alone. Everything else needs an attached
//! connection and ends in a broadcast to the whole room, sender included:
//! the new role pair after a successful seat claim, and the raw inbound text
//! for position updates and opaque client signals.

use std::sync::Arc;
use thiserror::Error;

use crate::broadcast::FanOut;
use crate::membership::{Connection, JoinError, MembershipManager};
use crate::protocol::{Inbound, ProtocolError, RoomMessage};
use crate::room::{RoomKey, RoomKeyError};

/// What routing a frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Attached; `reply` goes back to the sender only
    Joined { reply: String },
    RolesChanged(FanOut),
    /// Seat claim that did not satisfy its preconditions. Not reported to
    /// the sender.
    RoleClaimIgnored,
    PositionRecorded { appended: bool, fan_out: FanOut },
    Relayed(FanOut),
}

/// Frames the router drops. The connection stays open for all of them.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid room identifier: {0}")]
    InvalidRoomKey(#[from] RoomKeyError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("message received without room assignment")]
    NotAttached,
    #[error("room {0} no longer exists")]
    RoomGone(RoomKey),
}

pub struct MessageRouter {
    membership: Arc<MembershipManager>,
    max_room_key_len: usize,
}

impl MessageRouter {
    pub fn new(membership: Arc<MembershipManager>, max_room_key_len: usize) -> Self {
        Self {
            membership,
            max_room_key_len,
        }
    }

    pub fn membership(&self) -> &Arc<MembershipManager> {
        &self.membership
    }

    /// Route one text frame received on `conn`.
    pub async fn route(
        &self,
        conn: &mut Connection,
        text: &str,
    ) -> Result<RouteOutcome, RouteError> {
        match Inbound::parse(text)? {
            Inbound::Join { room } => {
                let key = RoomKey::parse(&room, self.max_room_key_len)?;
                let snapshot = self.membership.join(conn, key).await?;
                Ok(RouteOutcome::Joined {
                    reply: snapshot.encode()?,
                })
            }
            Inbound::Room(message) => self.route_to_room(conn, message, text).await,
        }
    }

    /// Disconnect notification from the transport.
    pub async fn disconnect(&self, conn: &mut Connection) {
        self.membership.leave(conn).await;
    }

    async fn route_to_room(
        &self,
        conn: &Connection,
        message: RoomMessage,
        raw: &str,
    ) -> Result<RouteOutcome, RouteError> {
        let key = conn.room().ok_or(RouteError::NotAttached)?;
        let room = self
            .membership
            .registry()
            .get(key)
            .await
            .ok_or_else(|| RouteError::RoomGone(key.clone()))?;
        let mut room = room.lock().await;

        match message {
            RoomMessage::RoleClaim { username, role } => {
                let claimed = role.is_some_and(|role| room.claim_role(role, &username));
                if !claimed {
                    log::debug!("Room {key}: seat claim by {username} ignored");
                    return Ok(RouteOutcome::RoleClaimIgnored);
                }
                log::info!("Room {key}: {username} took {:?}", role);
                let text = room.roles().view().encode()?;
                Ok(RouteOutcome::RolesChanged(room.broadcast(&Arc::from(text))))
            }
            RoomMessage::PositionUpdate { position, message } => {
                let appended = room.record_position(position, message);
                let fan_out = room.broadcast(&Arc::from(raw));
                Ok(RouteOutcome::PositionRecorded { appended, fan_out })
            }
            RoomMessage::Relay => {
                log::trace!("Room {key}: relaying opaque message");
                Ok(RouteOutcome::Relayed(room.broadcast(&Arc::from(raw))))
            }
        }
    }
}
