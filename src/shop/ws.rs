//! Change feed for open pages.
//!
//! Every successful save is pushed to connected clients as a [`WsMessage`].
//! Clients only listen; anything they send other than Pong or Close is
//! ignored.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::models::{Customer, Ticket};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    CustomerSaved { customer: Customer, revision: u64 },
    TicketSaved { ticket: Ticket, revision: u64 },
    /// Some saves were dropped for this client; it must reload its view.
    Resync,
}

pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    tx: broadcast::Sender<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_change_feed(socket, tx.subscribe()))
}

/// Tracks whether the client still answers pings.
#[derive(Debug)]
struct Keepalive {
    last_pong: Instant,
    awaiting_pong: bool,
}

impl Keepalive {
    fn new(now: Instant) -> Self {
        Self {
            last_pong: now,
            awaiting_pong: false,
        }
    }

    /// Called on each ping tick. False when the client has gone quiet.
    fn ping_due(&mut self, now: Instant) -> bool {
        if self.awaiting_pong && now.duration_since(self.last_pong) > PONG_TIMEOUT {
            return false;
        }
        self.awaiting_pong = true;
        true
    }

    fn pong(&mut self, now: Instant) {
        self.last_pong = now;
        self.awaiting_pong = false;
    }
}

/// The frame to push for one broadcast result, or `None` when the feed
/// has closed.
fn change_frame(result: Result<String, broadcast::error::RecvError>) -> Option<String> {
    match result {
        Ok(json) => Some(json),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "ws client lagged, asking it to resync");
            serde_json::to_string(&WsMessage::Resync).ok()
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn push(sender: &mut SplitSink<WebSocket, Message>, frame: Message) -> bool {
    sender.send(frame).await.is_ok()
}

async fn run_change_feed(socket: WebSocket, mut changes: broadcast::Receiver<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut keepalive = Keepalive::new(Instant::now());

    loop {
        let open = tokio::select! {
            _ = ticker.tick() => {
                if !keepalive.ping_due(Instant::now()) {
                    tracing::debug!("ws client missed pong, closing");
                    break;
                }
                push(&mut sender, Message::Ping(Vec::new().into())).await
            }
            result = changes.recv() => match change_frame(result) {
                Some(json) => push(&mut sender, Message::Text(json.into())).await,
                None => false,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => {
                    keepalive.pong(Instant::now());
                    true
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
        };
        if !open {
            break;
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}
