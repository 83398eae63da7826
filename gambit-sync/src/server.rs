//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── Room "r1" ── history / roles / members
//!             ├── MessageRouter ─────┤
//! Client B ──┘        │              └── Room "r2" ── ...
//!                     │
//!              MembershipManager ── SessionRegistry
//! ```
//!
//! Each accepted socket gets its own task. The task owns the socket and the
//! receiving half of the connection's outbox, and multiplexes two sources
//! with `select!`: frames from the client go through the router, messages
//! fanned out by the room go back down the socket. However the task ends, it
//! detaches the connection from its room.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::{OutboxReceiver, PeerHandle};
use crate::config::ServerConfig;
use crate::membership::{Connection, MembershipManager};
use crate::protocol::ProtocolError;
use crate::registry::SessionRegistry;
use crate::router::{MessageRouter, RouteOutcome};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Frames dropped by the router (malformed, unattached, refused joins)
    pub dropped_messages: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let membership = Arc::new(MembershipManager::new(
            registry.clone(),
            config.max_members_per_room,
        ));
        let router = Arc::new(MessageRouter::new(membership, config.max_room_key_len));

        Self {
            config,
            registry,
            router,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve WebSocket connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let router = self.router.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, router, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<MessageRouter>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));
        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (peer, mut outbox) = PeerHandle::channel(config.outbox_capacity);
        let mut conn = Connection::new(peer);

        let result = Self::pump(ws_stream, addr, &mut conn, &mut outbox, &router, &stats).await;

        // Cleanup runs whichever way the pump ended
        router.disconnect(&mut conn).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        log::info!("Connection closed from {addr}");

        result
    }

    /// Shuttle frames between the socket, the router and the outbox.
    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        conn: &mut Connection,
        outbox: &mut OutboxReceiver,
        router: &MessageRouter,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    let reply = match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::dispatch(router, conn, text.as_str(), addr, stats).await
                        }
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => Self::dispatch(router, conn, text, addr, stats).await,
                            Err(_) => {
                                log::warn!("Dropped message from {addr}: {}", ProtocolError::NotUtf8);
                                stats.write().await.dropped_messages += 1;
                                None
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                            None
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        Some(Ok(_)) => None,
                    };

                    if let Some(reply) = reply {
                        ws_sender.send(Message::text(reply)).await?;
                    }
                }

                // Outgoing room broadcast
                Some(text) = outbox.recv() => {
                    ws_sender.send(Message::text(text.to_string())).await?;
                }
            }
        }

        Ok(())
    }

    /// Route one frame. Returns the reply meant for the sender alone.
    async fn dispatch(
        router: &MessageRouter,
        conn: &mut Connection,
        text: &str,
        addr: SocketAddr,
        stats: &RwLock<ServerStats>,
    ) -> Option<String> {
        {
            let mut s = stats.write().await;
            s.total_messages += 1;
            s.total_bytes += text.len() as u64;
        }

        match router.route(conn, text).await {
            Ok(RouteOutcome::Joined { reply }) => Some(reply),
            Ok(outcome) => {
                log::trace!("Routed message from {addr}: {outcome:?}");
                None
            }
            Err(e) => {
                log::warn!("Dropped message from {addr}: {e}");
                stats.write().await.dropped_messages += 1;
                None
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.registry.room_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}
