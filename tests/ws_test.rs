//! WebSocket transport over a real socket

use futures_util::StreamExt;
use safe_escape::domain::types::UserId;
use safe_escape::infra::Metrics;
use safe_escape::io::ws::{serve_ws, WsSettings};
use safe_escape::services::ConnectionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

struct Server {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
}

async fn start() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve_ws(
        listener,
        registry.clone(),
        metrics.clone(),
        WsSettings { outbound_queue: 8 },
        shutdown_rx,
    ));
    Server { addr, registry, metrics, shutdown }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_registered_user_receives_push() {
    let server = start().await;
    let user = UserId::new_v7();

    let (mut ws, _) = connect_async(format!("ws://{}/ws?userId={user}", server.addr)).await.unwrap();
    wait_until(|| server.registry.contains(user)).await;

    assert!(server.registry.send(user, "r1 r2 r3"));
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame, Message::Text("r1 r2 r3".to_string()));

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn test_missing_user_id_is_rejected() {
    let server = start().await;
    assert!(connect_async(format!("ws://{}/ws", server.addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/ws?userId=bogus", server.addr)).await.is_err());
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_close_unregisters_connection() {
    let server = start().await;
    let user = UserId::new_v7();

    let (mut ws, _) = connect_async(format!("ws://{}/ws?userId={user}", server.addr)).await.unwrap();
    wait_until(|| server.registry.contains(user)).await;
    ws.close(None).await.unwrap();

    wait_until(|| !server.registry.contains(user)).await;
    assert!(!server.registry.send(user, "late"));
    wait_until(|| server.metrics.report().live_connections == 0).await;
}

#[tokio::test]
async fn test_reconnect_replaces_and_old_close_keeps_new() {
    let server = start().await;
    let user = UserId::new_v7();

    let (mut old, _) = connect_async(format!("ws://{}/ws?userId={user}", server.addr)).await.unwrap();
    wait_until(|| server.registry.contains(user)).await;

    let (mut new, _) = connect_async(format!("ws://{}/ws?userId={user}", server.addr)).await.unwrap();
    // The old connection's queue is closed when it is replaced
    let closed = tokio::time::timeout(Duration::from_secs(2), old.next()).await.unwrap();
    assert!(matches!(closed, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    assert!(server.registry.send(user, "fresh"));
    let frame = tokio::time::timeout(Duration::from_secs(2), new.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame, Message::Text("fresh".to_string()));
    assert_eq!(server.registry.len(), 1);
}
