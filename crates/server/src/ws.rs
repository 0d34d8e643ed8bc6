// crates/server/src/ws.rs
//! WebSocket endpoint feeding the notification channels.
//!
//! Each socket gets an unbounded outbound queue registered with the
//! [`ChannelManager`]; a forwarding task drains the queue into the sink while
//! the read loop handles the small inbound protocol (ping, subscribe,
//! unsubscribe). Malformed payloads get an `error` reply back to the sender
//! only; they never terminate the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use trainyard_jobs::MessageType;

use crate::channels::{ChannelManager, ConnectionId, WsMessage};
use crate::state::AppState;

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let conn_id = state.channels.connect(tx);

    // Drain the outbound queue into the socket.
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&state.channels, conn_id, &text),
            Message::Close(_) => break,
            // Pong for protocol-level pings is handled by axum.
            _ => {}
        }
    }

    state.channels.disconnect(conn_id);
    forward_task.abort();
    debug!(connection_id = conn_id, "websocket closed");
}

/// Dispatch one inbound text frame. Anything unparseable or outside the
/// known message types earns an `error` reply to this connection alone.
fn handle_client_message(channels: &ChannelManager, conn_id: ConnectionId, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            reply_error(channels, conn_id, &format!("invalid message: {e}"));
            return;
        }
    };

    match parsed.kind.as_str() {
        "ping" => {
            channels.send_to(conn_id, WsMessage::new(MessageType::Pong, None, json!({})));
        }
        "subscribe" | "unsubscribe" => {
            let Some(channel) = parsed.data.get("channel").and_then(Value::as_str) else {
                reply_error(channels, conn_id, "missing data.channel");
                return;
            };
            if parsed.kind == "subscribe" {
                channels.subscribe(conn_id, channel);
            } else {
                channels.unsubscribe(conn_id, channel);
            }
        }
        other => reply_error(channels, conn_id, &format!("unknown message type: {other}")),
    }
}

fn reply_error(channels: &ChannelManager, conn_id: ConnectionId, message: &str) {
    channels.send_to(
        conn_id,
        WsMessage::new(MessageType::Error, None, json!({ "error": message })),
    );
}
