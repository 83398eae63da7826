//! Best-effort fan-out to the members of a room.
//!
//! Every connection owns a bounded outbox (`mpsc` channel) drained by its
//! WebSocket writer. Fan-out never blocks: it uses `try_send`, skips members
//! whose outbox is already closed, and logs members whose outbox is full.
//! Nothing here removes a member; that only happens through an explicit leave.
//!
//! Messages are shared as `Arc<str>` so a fan-out to N peers costs N refcount
//! bumps, not N copies.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Receiving half of a connection's outbox.
pub type OutboxReceiver = mpsc::Receiver<Arc<str>>;

/// Why a single delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbox full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Handle the room keeps for each attached connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: Uuid,
    sender: mpsc::Sender<Arc<str>>,
}

impl PeerHandle {
    /// Create a handle with a fresh id and an outbox of `capacity` messages.
    pub fn channel(capacity: usize) -> (Self, OutboxReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            sender,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Readiness check: the writer side still holds the receiver.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Non-blocking send.
    pub fn deliver(&self, message: Arc<str>) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Members that got the message queued
    pub delivered: usize,
    /// Members not open at send time
    pub skipped: usize,
    /// Members whose send failed
    pub failed: usize,
}

/// Send `message` to every open peer.
///
/// Failures are logged per peer and never abort the batch.
pub fn fan_out<'a, I>(peers: I, message: &Arc<str>) -> FanOut
where
    I: IntoIterator<Item = &'a PeerHandle>,
{
    let mut result = FanOut::default();
    for peer in peers {
        if !peer.is_open() {
            result.skipped += 1;
            continue;
        }
        match peer.deliver(Arc::clone(message)) {
            Ok(()) => result.delivered += 1,
            Err(e) => {
                log::warn!("Dropped message for peer {}: {e}", peer.id);
                result.failed += 1;
            }
        }
    }
    result
}

/// Running totals for one room's broadcasts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub messages_dropped: u64,
}

impl BroadcastStats {
    pub fn record(&mut self, fan_out: &FanOut) {
        self.messages_sent += 1;
        self.deliveries += fan_out.delivered as u64;
        self.messages_dropped += (fan_out.skipped + fan_out.failed) as u64;
    }
}
