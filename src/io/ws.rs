//! WebSocket push transport
//!
//! Occupant apps connect to `/ws?userId=<uuid>`. Each accepted connection
//! is registered in the `ConnectionRegistry`; a writer task drains the
//! connection's outbound queue one text frame at a time while the reader
//! loop watches for Close. On exit the registry entry is removed only if it
//! still belongs to this connection.

use crate::domain::types::UserId;
use crate::infra::metrics::Metrics;
use crate::services::registry::{ConnectionHandle, ConnectionRegistry};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Upgrade path
pub const WS_PATH: &str = "/ws";

/// Settings shared by every connection
#[derive(Debug, Clone, Copy)]
pub struct WsSettings {
    pub outbound_queue: usize,
}

/// Extract the `userId` query parameter
pub fn parse_user_id(query: Option<&str>) -> Option<UserId> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("userId="))
        .and_then(|raw| raw.parse().ok())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Bind and serve the WebSocket listener
pub async fn start_ws_server(
    port: u16,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    settings: WsSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, outbound_queue = %settings.outbound_queue, "ws_server_started");
    serve_ws(listener, registry, metrics, settings, shutdown).await
}

/// Accept loop over an already bound listener
pub async fn serve_ws(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    settings: WsSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ws_server_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let registry = registry.clone();
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            handle_ws_connection(stream, addr, registry, metrics, settings).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "ws_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_ws_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    settings: WsSettings,
) {
    let mut user_id = None;
    let handshake = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() != WS_PATH {
            return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
        }
        match parse_user_id(req.uri().query()) {
            Some(user) => {
                user_id = Some(user);
                Ok(resp)
            }
            None => Err(reject(StatusCode::BAD_REQUEST, "missing or invalid userId")),
        }
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %addr, error = %e, "ws_handshake_rejected");
            return;
        }
    };
    let Some(user) = user_id else {
        return;
    };

    let (handle, mut outbound) = ConnectionHandle::channel(settings.outbound_queue);
    let conn_id = handle.id();
    // Dropping a replaced handle closes the older connection's queue
    drop(registry.add(user, handle));
    metrics.set_live_connections(registry.len());
    info!(user_id = %user, conn = %conn_id, peer = %addr, "ws_connection_opened");

    let (mut sink, mut inbound) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(payload)).await {
                debug!(conn = %conn_id, error = %e, "ws_write_failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                debug!(user_id = %user, conn = %conn_id, text = %text, "ws_message_received");
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by the protocol layer
            Ok(_) => {}
            Err(e) => {
                debug!(user_id = %user, conn = %conn_id, error = %e, "ws_read_failed");
                break;
            }
        }
    }

    let removed = registry.remove_if_current(user, conn_id);
    metrics.set_live_connections(registry.len());
    writer.abort();
    info!(user_id = %user, conn = %conn_id, removed = %removed, "ws_connection_closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        let id = "018f3a52-7c3e-7b9a-9c1d-2f4e5a6b7c8d";
        assert_eq!(parse_user_id(Some(&format!("userId={id}"))).unwrap().to_string(), id);
        assert_eq!(
            parse_user_id(Some(&format!("lang=en&userId={id}"))).unwrap().to_string(),
            id
        );
        assert!(parse_user_id(None).is_none());
        assert!(parse_user_id(Some("userId=nope")).is_none());
        assert!(parse_user_id(Some("user=1")).is_none());
    }
}
