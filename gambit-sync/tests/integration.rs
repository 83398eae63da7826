//! Integration tests for the relay over real WebSocket connections.
//!
//! These tests start a real server and connect real clients,
//! verifying join, seating, move relay and the leave policy end to end.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use gambit_sync::{RoomKey, ServerConfig, SessionRegistry, SyncServer, START_POSITION};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port, return its URL and registry.
async fn start_test_server(config: ServerConfig) -> (String, Arc<SessionRegistry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = SyncServer::new(ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..config
    });
    let registry = server.registry().clone();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (format!("ws://127.0.0.1:{port}"), registry)
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// Next text frame, parsed.
async fn recv(ws: &mut Client) -> Value {
    serde_json::from_str(&recv_text(ws).await).unwrap()
}

async fn recv_text(ws: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return text.as_str().to_string();
        }
    }
}

/// Assert nothing arrives for a short while.
async fn assert_silent(ws: &mut Client) {
    let result = timeout(Duration::from_millis(150), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

async fn join(ws: &mut Client, room: &str) -> Value {
    send(ws, json!({ "joinRoom": room })).await;
    recv(ws).await
}

fn key(raw: &str) -> RoomKey {
    RoomKey::parse(raw, 64).unwrap()
}

/// Wait up to two seconds for `room` to disappear from the registry.
async fn wait_until_removed(registry: &SessionRegistry, room: &str) -> bool {
    for _ in 0..40 {
        if !registry.contains(&key(room)).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn history(registry: &SessionRegistry, room: &str) -> Vec<String> {
    let room = registry.get(&key(room)).await.unwrap();
    let room = room.lock().await;
    room.history().to_vec()
}

#[tokio::test]
async fn test_full_session_scenario() {
    let (url, registry) = start_test_server(ServerConfig::default()).await;

    // A creates the room
    let mut a = connect(&url).await;
    let snapshot = join(&mut a, "r1").await;
    assert_eq!(snapshot["FEN"], START_POSITION);
    assert_eq!(snapshot["currentFEN"], START_POSITION);
    assert_eq!(snapshot["online"], 1);
    assert!(snapshot.get("lastMove").is_none());

    // B joins the same room
    let mut b = connect(&url).await;
    let snapshot = join(&mut b, "r1").await;
    assert_eq!(snapshot["FEN"], START_POSITION);
    assert_eq!(snapshot["currentFEN"], START_POSITION);
    assert_eq!(snapshot["online"], 2);

    // A takes white; both see the pair
    send(&mut a, json!({ "username": "alice", "color": "w" })).await;
    for ws in [&mut a, &mut b] {
        let roles = recv(ws).await;
        assert_eq!(roles, json!({ "white": "alice", "black": null }));
    }

    // A moves; B gets the full message
    let p1 = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
    let update = json!({ "FEN": p1, "from": "e2", "to": "e4", "san": "e4", "color": "w" });
    send(&mut a, update.clone()).await;
    assert_eq!(recv(&mut b).await, update);
    assert_eq!(recv(&mut a).await, update);
    assert_eq!(history(&registry, "r1").await, vec![START_POSITION.to_string(), p1.to_string()]);

    // A leaves; B sees the reset
    a.close(None).await.unwrap();
    let reset = recv(&mut b).await;
    assert_eq!(reset["FEN"], START_POSITION);
    assert_eq!(reset["currentFEN"], START_POSITION);
    assert_eq!(reset["online"], 1);
    assert!(reset["white"].is_null());
    assert!(reset["black"].is_null());
    assert_eq!(history(&registry, "r1").await, vec![START_POSITION.to_string()]);

    // B leaves; the room is gone
    b.close(None).await.unwrap();
    assert!(wait_until_removed(&registry, "r1").await);
}

#[tokio::test]
async fn test_mid_game_join_sees_last_two_positions() {
    let (url, _registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "mid").await;
    join(&mut b, "mid").await;

    for (position, san) in [("p1", "e4"), ("p2", "e5"), ("p3", "Nf3")] {
        send(&mut a, json!({ "FEN": position, "san": san })).await;
        recv(&mut a).await;
        recv(&mut b).await;
    }

    let mut observer = connect(&url).await;
    let snapshot = join(&mut observer, "mid").await;
    assert_eq!(snapshot["FEN"], "p2");
    assert_eq!(snapshot["currentFEN"], "p3");
    assert_eq!(snapshot["lastMove"], json!({ "FEN": "p3", "san": "Nf3" }));
    assert_eq!(snapshot["online"], 3);
}

#[tokio::test]
async fn test_repeated_position_updates_last_move_only() {
    let (url, registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    join(&mut a, "rep").await;

    send(&mut a, json!({ "FEN": "p1" })).await;
    recv(&mut a).await;
    send(&mut a, json!({ "FEN": "p2" })).await;
    recv(&mut a).await;
    send(&mut a, json!({ "FEN": "p1", "repetition": 2 })).await;
    // duplicates are still relayed
    assert_eq!(recv(&mut a).await["repetition"], 2);

    assert_eq!(history(&registry, "rep").await.len(), 3);
    let room = registry.get(&key("rep")).await.unwrap();
    assert_eq!(room.lock().await.last_update().unwrap()["repetition"], 2);
}

#[tokio::test]
async fn test_second_claim_for_both_seats_ignored() {
    let (url, _registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "seats").await;
    join(&mut b, "seats").await;

    send(&mut a, json!({ "username": "alice", "color": "w" })).await;
    recv(&mut a).await;
    recv(&mut b).await;

    // alice cannot also take black, bob cannot take white
    send(&mut a, json!({ "username": "alice", "color": "b" })).await;
    send(&mut b, json!({ "username": "bob", "color": "w" })).await;
    assert_silent(&mut a).await;

    send(&mut b, json!({ "username": "bob", "color": "b" })).await;
    let roles = recv(&mut a).await;
    assert_eq!(roles, json!({ "white": "alice", "black": "bob" }));
}

#[tokio::test]
async fn test_opaque_signals_relayed_verbatim() {
    let (url, _registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "signals").await;
    join(&mut b, "signals").await;

    let raw = r#"{"restartRequest":true,"player":"alice"}"#;
    send_raw(&mut a, raw).await;
    assert_eq!(recv_text(&mut b).await, raw);

    let raw = r#"{"xpUpdate":true,"whiteXP":12,"blackXP":7}"#;
    send_raw(&mut b, raw).await;
    assert_eq!(recv_text(&mut a).await, raw);
}

#[tokio::test]
async fn test_unattached_and_malformed_messages_dropped() {
    let (url, registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    send_raw(&mut a, "this is not json").await;
    send(&mut a, json!({ "FEN": "p1" })).await;
    send(&mut a, json!({ "restartRequest": true })).await;
    assert_silent(&mut a).await;
    assert_eq!(registry.room_count().await, 0);

    // the connection survived and can still join
    let snapshot = join(&mut a, "late").await;
    assert_eq!(snapshot["currentFEN"], START_POSITION);
    assert_eq!(history(&registry, "late").await, vec![START_POSITION.to_string()]);
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (url, _registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "left").await;
    join(&mut b, "right").await;

    send(&mut a, json!({ "FEN": "p1" })).await;
    recv(&mut a).await;
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_room_full_join_gets_no_reply() {
    let config = ServerConfig {
        max_members_per_room: 2,
        ..ServerConfig::default()
    };
    let (url, _registry) = start_test_server(config).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;
    join(&mut a, "pair").await;
    join(&mut b, "pair").await;

    send(&mut c, json!({ "joinRoom": "pair" })).await;
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn test_refused_switch_keeps_game_running() {
    let config = ServerConfig {
        max_members_per_room: 2,
        ..ServerConfig::default()
    };
    let (url, registry) = start_test_server(config).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;
    let mut d = connect(&url).await;
    join(&mut a, "game").await;
    join(&mut b, "game").await;
    join(&mut c, "busy").await;
    join(&mut d, "busy").await;

    send(&mut a, json!({ "FEN": "p1" })).await;
    recv(&mut a).await;
    recv(&mut b).await;

    // "busy" is full: no snapshot for a, no reset for b
    send(&mut a, json!({ "joinRoom": "busy" })).await;
    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
    assert_eq!(history(&registry, "game").await, vec![START_POSITION.to_string(), "p1".to_string()]);

    // a is still seated in "game"
    send(&mut a, json!({ "FEN": "p2" })).await;
    assert_eq!(recv(&mut b).await["FEN"], "p2");
}

#[tokio::test]
async fn test_room_recreated_after_everyone_left() {
    let (url, registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    join(&mut a, "again").await;
    send(&mut a, json!({ "FEN": "p1" })).await;
    recv(&mut a).await;
    a.close(None).await.unwrap();
    assert!(wait_until_removed(&registry, "again").await);

    let mut b = connect(&url).await;
    let snapshot = join(&mut b, "again").await;
    assert_eq!(snapshot["currentFEN"], START_POSITION);
    assert_eq!(snapshot["online"], 1);
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let (url, _registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(&url).await;
    a.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    let frame = timeout(Duration::from_secs(2), a.next()).await.unwrap().unwrap().unwrap();
    match frame {
        Message::Pong(data) => assert_eq!(data.as_ref(), &[1, 2, 3]),
        other => panic!("expected pong, got {other:?}"),
    }
}
