//! Connected clients and broadcast fan-out.
//!
//! Each WebSocket connection is represented by an unbounded channel whose
//! receiving end is drained by that connection's writer task.  The registry
//! only ever holds the sending ends, so pushing a message never waits on a
//! slow socket.
//!
//! This map is the one resource shared across every session: it is written
//! only on connect and disconnect, and read for every reply and broadcast,
//! hence the `RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Identifies one connected client for its lifetime.
pub type ClientId = Uuid;

/// One connected client.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub client_id: ClientId,
    sender: mpsc::UnboundedSender<String>,
}

impl ClientConnection {
    /// A connection is open while its writer task still holds the receiver.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Registry of connected clients.  Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client whose outbound text frames go to `sender`.
    pub async fn register(&self, sender: mpsc::UnboundedSender<String>) -> ClientId {
        let client_id = Uuid::new_v4();
        self.clients.write().await.insert(
            client_id,
            ClientConnection {
                client_id,
                sender,
            },
        );
        debug!("client {client_id} registered");
        client_id
    }

    /// Removes a client.  Returns `false` if it was not registered.
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&client_id).is_some();
        if removed {
            debug!("client {client_id} unregistered");
        }
        removed
    }

    /// `true` while `client_id` is registered.
    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.clients.read().await.contains_key(&client_id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Serializes `message` and queues it for one client.  Returns `false`
    /// when the client is gone or closed.
    pub async fn send_to<T: Serialize>(&self, client_id: ClientId, message: &T) -> bool {
        let Some(text) = to_json(message) else {
            return false;
        };
        let clients = self.clients.read().await;
        match clients.get(&client_id) {
            Some(conn) if conn.is_open() => conn.sender.send(text).is_ok(),
            _ => {
                trace!("client {client_id} is not open; message dropped");
                false
            }
        }
    }

    /// Serializes `message` once and queues it for every open client.
    /// Closed clients are skipped silently.  Returns how many were reached.
    pub async fn broadcast<T: Serialize>(&self, message: &T) -> usize {
        let Some(text) = to_json(message) else {
            return 0;
        };
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.sender.send(text.clone()).is_ok())
            .count()
    }
}

fn to_json<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("failed to serialize outbound message: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
