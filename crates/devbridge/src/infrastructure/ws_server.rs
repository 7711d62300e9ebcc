//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session, but only on the
//!    configured route path.  Any other path is answered with `404 Not Found`
//!    and the TCP connection is dropped.
//! 4. Running two tasks per connection:
//!    - **Writer**: drains the connection's outbound channel (replies and
//!      broadcasts queued by the router) into the WebSocket sink.
//!    - **Reader**: reads text frames and hands each one to the router in its
//!      own task, so a long-running device command never delays the next
//!      message from the same client.
//! 5. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Why a channel per connection?
//!
//! Broadcasts come from the managers' event pumps, replies from request
//! tasks.  Both only push a `String` into an unbounded channel; the single
//! writer task is the only code that touches the socket sink.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::Router;
use crate::domain::config::BridgeConfig;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    config: &BridgeConfig,
    router: Router,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    info!(
        "device bridge listening on ws://{}{}",
        config.bind_addr, config.route_path
    );

    serve(listener, config.route_path.clone(), router, running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Split out from [`run_server`] so tests can bind port 0 and learn the
/// ephemeral port before the loop starts.
pub async fn serve(
    listener: TcpListener,
    route_path: String,
    router: Router,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let route_path: Arc<str> = Arc::from(route_path);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the loop notices the shutdown flag even when no
        // client is connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new TCP connection from {peer_addr}");
                let router = router.clone();
                let route_path = Arc::clone(&route_path);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, route_path, router).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {
                // No new connection in the last 200 ms.
            }
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    route_path: Arc<str>,
    router: Router,
) {
    match run_connection(stream, peer_addr, &route_path, router).await {
        Ok(()) => info!("connection {peer_addr} closed normally"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    route_path: &str,
    router: Router,
) -> anyhow::Result<()> {
    // ── Step 1: Handshake, restricted to the route path ───────────────────────
    let check_path = |request: &Request, response: Response| {
        let path = request.uri().path();
        if path_matches(route_path, path) {
            Ok(response)
        } else {
            debug!("{peer_addr}: rejecting upgrade on unknown path {path}");
            let mut not_found = ErrorResponse::new(Some("Not Found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };
    let ws_stream = accept_hdr_async(stream, check_path)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // ── Step 2: Register with the router ──────────────────────────────────────
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let client_id = router.handle_connection(out_tx).await;
    info!("connection {peer_addr} registered as client {client_id}");

    // ── Step 3: Writer task ───────────────────────────────────────────────────
    //
    // Ends when the router unregisters the client (the only sender is dropped)
    // or when the socket refuses a write.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                debug!("client {client_id}: WebSocket send failed (peer gone)");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Step 4: Reader loop ───────────────────────────────────────────────────
    loop {
        let message = match ws_rx.next().await {
            Some(Ok(message)) => message,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("client {client_id}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("client {client_id}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("client {client_id}: stream ended");
                break;
            }
        };

        match message {
            WsMessage::Text(text) => {
                let router = router.clone();
                tokio::spawn(async move {
                    router.handle_text(client_id, &text).await;
                });
            }
            WsMessage::Binary(_) => {
                // The protocol is JSON text only.
                warn!("client {client_id}: unexpected binary frame (ignored)");
            }
            WsMessage::Ping(data) => {
                debug!("client {client_id}: WebSocket ping ({} bytes)", data.len());
            }
            WsMessage::Pong(_) => {
                debug!("client {client_id}: WebSocket pong received");
            }
            WsMessage::Close(_) => {
                debug!("client {client_id}: Close frame received");
                break;
            }
            WsMessage::Frame(_) => {
                debug!("client {client_id}: raw frame (ignored)");
            }
        }
    }

    // ── Step 5: Tear down ─────────────────────────────────────────────────────
    router.handle_disconnect(client_id).await;
    writer.abort();
    Ok(())
}

/// Returns `true` when `path` is the route, ignoring one trailing slash.
fn path_matches(route: &str, path: &str) -> bool {
    let trim = |p: &str| -> String {
        let p = p.trim_end_matches('/');
        if p.is_empty() {
            "/".to_string()
        } else {
            p.to_string()
        }
    };
    trim(route) == trim(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matches_exact_route() {
        assert!(path_matches("/device-bridge", "/device-bridge"));
    }

    #[test]
    fn test_path_matches_ignores_trailing_slash() {
        assert!(path_matches("/device-bridge", "/device-bridge/"));
        assert!(path_matches("/device-bridge/", "/device-bridge"));
    }

    #[test]
    fn test_path_matches_rejects_other_paths() {
        assert!(!path_matches("/device-bridge", "/"));
        assert!(!path_matches("/device-bridge", "/device-bridge/extra"));
        assert!(!path_matches("/device-bridge", "/other"));
    }

    #[test]
    fn test_path_matches_root_route() {
        assert!(path_matches("/", "/"));
        assert!(!path_matches("/", "/x"));
    }
}
