//! WebSocket fan-out hub. Browser clients connect over `GET /ws` and
//! receive every broadcast event as a `{type, payload}` JSON frame.
//! Grounded on `web/state.rs`'s `AppState` (a `DashMap` of per-connection
//! channels feeding an axum socket), generalized from SSE sessions to
//! WebSocket clients with the bounded, drop-on-full queue spec.md §4.9
//! requires instead of an unbounded one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-client outbound queue depth used when nothing more specific is
/// configured. Production wiring passes the `hub_queue_depth` tunable
/// instead.
pub const DEFAULT_CLIENT_QUEUE_DEPTH: usize = 64;

pub struct Hub {
    clients: DashMap<Uuid, mpsc::Sender<WsMessage>>,
    client_count: AtomicUsize,
    queue_depth: usize,
}

impl Hub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            clients: DashMap::new(),
            client_count: AtomicUsize::new(0),
            queue_depth,
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    /// Upgrade an incoming HTTP request to a WebSocket and register the
    /// new connection. Inbound frames from the browser are drained and
    /// discarded; this hub is a one-way event feed.
    pub fn handle_upgrade(self: &Arc<Self>, ws: WebSocketUpgrade) -> Response {
        let hub = self.clone();
        ws.on_upgrade(move |socket| async move { hub.serve_client(socket).await })
    }

    /// Drives the hub until `cancel` fires, then closes every connected
    /// client cleanly: dropping each client's sender closes its receive
    /// half, which breaks that client's `serve_client` loop and drops
    /// its socket.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        cancel.cancelled().await;
        let closed = self.clients.len();
        self.clients.clear();
        if closed > 0 {
            info!(closed, "closing websocket clients on shutdown");
        }
    }

    async fn serve_client(self: Arc<Self>, socket: WebSocket) {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(self.queue_depth);
        self.clients.insert(id, tx);
        self.client_count.fetch_add(1, Ordering::SeqCst);
        debug!(%id, clients = self.client_count(), "websocket client connected");

        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(_)) => continue,
                        _ => break,
                    }
                }
            }
        }

        self.clients.remove(&id);
        self.client_count.fetch_sub(1, Ordering::SeqCst);
        debug!(%id, clients = self.client_count(), "websocket client disconnected");
    }

    /// Broadcast a raw text frame to every connected client, dropping it
    /// for any client whose queue is full.
    pub async fn broadcast(&self, text: String) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(WsMessage::Text(text.clone().into())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(client = %entry.key(), "dropping event, client queue full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// Broadcast a typed event envelope `{type, payload}`.
    pub async fn broadcast_event(&self, event_type: &str, payload: Value) {
        let envelope = serde_json::json!({ "type": event_type, "payload": payload });
        match serde_json::to_string(&envelope) {
            Ok(text) => self.broadcast(text).await,
            Err(e) => debug!("failed to encode hub event: {e}"),
        }
    }
}
