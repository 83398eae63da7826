//! # gambit-sync: room-based relay for two-player chess sessions
//!
//! Keeps just enough state per room for a client that joins mid-game to
//! rebuild the board and the seating, and fans every move out to the room.
//! Move legality, clocks, skills and rendering live in the browser client;
//! the relay never interprets them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌───────────────┐
//! │ Browser     │ ◄─────────────────► │ SyncServer    │
//! │ (per player)│     JSON text       │ (per socket   │
//! └─────────────┘                     │  task)        │
//!                                     └───────┬───────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ MessageRouter │
//!                                     └───────┬───────┘
//!                                             │
//!                                  ┌──────────┴──────────┐
//!                                  ▼                     ▼
//!                         ┌─────────────────┐   ┌─────────────────┐
//!                         │ Membership      │──►│ SessionRegistry │
//!                         │ (join / leave)  │   │ key → Room      │
//!                         └─────────────────┘   └────────┬────────┘
//!                                                        │
//!                                               ┌────────┴────────┐
//!                                               │ Room (Mutex)    │
//!                                               │ history, roles, │
//!                                               │ members ─► fan  │
//!                                               └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire records and frame classification
//! - [`room`]: per-room history, seats and members
//! - [`broadcast`]: non-blocking fan-out over per-connection outboxes
//! - [`registry`]: create-or-get / remove of rooms by key
//! - [`membership`]: join, leave and the reset-on-leave policy
//! - [`router`]: dispatch of inbound frames
//! - [`server`]: WebSocket accept loop and connection tasks
//! - [`config`]: `ServerConfig` and environment overrides

pub mod protocol;
pub mod room;
pub mod broadcast;
pub mod registry;
pub mod membership;
pub mod router;
pub mod server;
pub mod config;

// Re-exports for convenience
pub use protocol::{Inbound, ProtocolError, Role, RoomMessage, RolesView, SnapshotView, START_POSITION};
pub use room::{RoleAssignments, Room, RoomKey, RoomKeyError};
pub use broadcast::{fan_out, BroadcastStats, DeliveryError, FanOut, PeerHandle};
pub use registry::{SessionRegistry, SharedRoom};
pub use membership::{Connection, JoinError, LeaveOutcome, MembershipManager};
pub use router::{MessageRouter, RouteError, RouteOutcome};
pub use server::{ServerStats, SyncServer};
pub use config::{ConfigError, ServerConfig};
