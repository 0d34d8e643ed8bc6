// crates/server/src/channels.rs
//! Registry of live WebSocket connections grouped into named channels.
//!
//! Channels are emergent: an entry appears when the first subscriber joins
//! and disappears when the last one leaves or disconnects. The channel→
//! subscribers and connection→subscriptions maps must always agree, so both
//! live behind one coarse lock and are only mutated together.
//!
//! Delivery is best-effort. A connection whose outbound queue is gone (the
//! socket task dropped its receiver) is removed after the delivery pass
//! completes; one dead subscriber never fails a broadcast for the rest.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use trainyard_jobs::MessageType;

/// Opaque handle for one live connection.
pub type ConnectionId = u64;

/// Wire-level notification message: `{type, channel, data, timestamp}`.
#[derive(Debug, Clone, Serialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub channel: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WsMessage {
    pub fn new(kind: MessageType, channel: Option<String>, data: Value) -> Self {
        Self {
            kind,
            channel,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<WsMessage>>,
    channels: HashMap<String, HashSet<ConnectionId>>,
    subscriptions: HashMap<ConnectionId, HashSet<String>>,
}

impl Registry {
    /// Remove a connection from the registry and every channel it was in.
    /// Returns false if the connection was already gone.
    fn remove(&mut self, id: ConnectionId) -> bool {
        if self.connections.remove(&id).is_none() {
            return false;
        }
        if let Some(channels) = self.subscriptions.remove(&id) {
            for channel in channels {
                if let Some(subscribers) = self.channels.get_mut(&channel) {
                    subscribers.remove(&id);
                    if subscribers.is_empty() {
                        self.channels.remove(&channel);
                    }
                }
            }
        }
        true
    }
}

/// Owns all live connections and their channel subscriptions.
pub struct ChannelManager {
    next_id: AtomicU64,
    inner: Mutex<Registry>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Register a new connection and ack it with a `connected` message.
    pub fn connect(&self, tx: mpsc::UnboundedSender<WsMessage>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ack = WsMessage::new(
            MessageType::Connected,
            None,
            json!({ "connection_id": id }),
        );
        let _ = tx.send(ack);
        match self.inner.lock() {
            Ok(mut registry) => {
                registry.connections.insert(id, tx);
            }
            Err(e) => tracing::error!("Mutex poisoned registering connection: {e}"),
        }
        tracing::debug!(connection_id = id, "connection registered");
        id
    }

    /// Drop a connection and all its subscriptions. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) {
        let removed = match self.inner.lock() {
            Ok(mut registry) => registry.remove(id),
            Err(e) => {
                tracing::error!("Mutex poisoned removing connection: {e}");
                return;
            }
        };
        if removed {
            tracing::debug!(connection_id = id, "connection removed");
        }
    }

    /// Add the connection to a channel's subscriber set, creating the channel
    /// entry if absent, and ack with `subscribed`.
    pub fn subscribe(&self, id: ConnectionId, channel: &str) {
        match self.inner.lock() {
            Ok(mut registry) => {
                let Some(tx) = registry.connections.get(&id).cloned() else {
                    return;
                };
                registry
                    .channels
                    .entry(channel.to_string())
                    .or_default()
                    .insert(id);
                registry
                    .subscriptions
                    .entry(id)
                    .or_default()
                    .insert(channel.to_string());
                let _ = tx.send(WsMessage::new(
                    MessageType::Subscribed,
                    Some(channel.to_string()),
                    json!({ "channel": channel }),
                ));
            }
            Err(e) => tracing::error!("Mutex poisoned subscribing: {e}"),
        }
    }

    /// Inverse of [`subscribe`](Self::subscribe); drops the channel entry
    /// when its subscriber set becomes empty.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &str) {
        match self.inner.lock() {
            Ok(mut registry) => {
                if let Some(subscribers) = registry.channels.get_mut(channel) {
                    subscribers.remove(&id);
                    if subscribers.is_empty() {
                        registry.channels.remove(channel);
                    }
                }
                if let Some(channels) = registry.subscriptions.get_mut(&id) {
                    channels.remove(channel);
                }
                if let Some(tx) = registry.connections.get(&id) {
                    let _ = tx.send(WsMessage::new(
                        MessageType::Unsubscribed,
                        Some(channel.to_string()),
                        json!({ "channel": channel }),
                    ));
                }
            }
            Err(e) => tracing::error!("Mutex poisoned unsubscribing: {e}"),
        }
    }

    /// Send directly to one connection (pong/error replies).
    pub fn send_to(&self, id: ConnectionId, message: WsMessage) -> bool {
        match self.inner.lock() {
            Ok(registry) => registry
                .connections
                .get(&id)
                .is_some_and(|tx| tx.send(message).is_ok()),
            Err(e) => {
                tracing::error!("Mutex poisoned sending to connection: {e}");
                false
            }
        }
    }

    /// Deliver to every subscriber of `channel`. Returns how many sends
    /// succeeded. Subscribers whose queue is gone are disconnected after the
    /// pass, never mid-iteration.
    pub fn broadcast(&self, channel: &str, message: &WsMessage) -> usize {
        match self.inner.lock() {
            Ok(mut registry) => {
                let ids: Vec<ConnectionId> = registry
                    .channels
                    .get(channel)
                    .map(|subscribers| subscribers.iter().copied().collect())
                    .unwrap_or_default();
                self.deliver(&mut registry, &ids, message)
            }
            Err(e) => {
                tracing::error!("Mutex poisoned broadcasting: {e}");
                0
            }
        }
    }

    /// Deliver to every live connection regardless of channel.
    pub fn broadcast_all(&self, message: &WsMessage) -> usize {
        match self.inner.lock() {
            Ok(mut registry) => {
                let ids: Vec<ConnectionId> = registry.connections.keys().copied().collect();
                self.deliver(&mut registry, &ids, message)
            }
            Err(e) => {
                tracing::error!("Mutex poisoned broadcasting: {e}");
                0
            }
        }
    }

    fn deliver(&self, registry: &mut Registry, ids: &[ConnectionId], message: &WsMessage) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();
        for id in ids {
            match registry.connections.get(id) {
                Some(tx) if tx.send(message.clone()).is_ok() => sent += 1,
                Some(_) => dead.push(*id),
                None => {}
            }
        }
        for id in dead {
            tracing::warn!(connection_id = id, "dropping unreachable subscriber");
            registry.remove(id);
        }
        sent
    }

    /// Number of current subscribers of a channel (zero if absent).
    pub fn channel_subscribers(&self, channel: &str) -> usize {
        match self.inner.lock() {
            Ok(registry) => registry.channels.get(channel).map_or(0, HashSet::len),
            Err(e) => {
                tracing::error!("Mutex poisoned reading channels: {e}");
                0
            }
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        match self.inner.lock() {
            Ok(registry) => registry.connections.len(),
            Err(e) => {
                tracing::error!("Mutex poisoned reading connections: {e}");
                0
            }
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connect(
        manager: &ChannelManager,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.connect(tx);
        // Swallow the connected ack so tests see only what they trigger.
        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.kind, MessageType::Connected);
        (id, rx)
    }

    #[test]
    fn test_connect_acks_and_counts() {
        let manager = ChannelManager::new();
        let (a, _rx_a) = connect(&manager);
        let (b, _rx_b) = connect(&manager);
        assert_ne!(a, b);
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn test_subscribe_ack_and_broadcast() {
        let manager = ChannelManager::new();
        let (a, mut rx_a) = connect(&manager);
        let (b, mut rx_b) = connect(&manager);

        manager.subscribe(a, "job:abc");
        manager.subscribe(b, "job:abc");
        assert_eq!(rx_a.try_recv().unwrap().kind, MessageType::Subscribed);
        assert_eq!(rx_b.try_recv().unwrap().kind, MessageType::Subscribed);
        assert_eq!(manager.channel_subscribers("job:abc"), 2);

        let msg = WsMessage::new(
            MessageType::JobProgress,
            Some("job:abc".into()),
            json!({"progress": 40.0}),
        );
        assert_eq!(manager.broadcast("job:abc", &msg), 2);
        assert_eq!(rx_a.try_recv().unwrap().kind, MessageType::JobProgress);
        assert_eq!(rx_b.try_recv().unwrap().kind, MessageType::JobProgress);

        // Disconnect one; only the other still receives.
        manager.disconnect(a);
        assert_eq!(manager.broadcast("job:abc", &msg), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().kind, MessageType::JobProgress);
        assert_eq!(manager.channel_subscribers("job:abc"), 1);
    }

    #[test]
    fn test_empty_channel_broadcast_is_harmless() {
        let manager = ChannelManager::new();
        let (a, mut rx_a) = connect(&manager);
        manager.subscribe(a, "job:xyz");
        rx_a.try_recv().unwrap();

        manager.unsubscribe(a, "job:xyz");
        assert_eq!(rx_a.try_recv().unwrap().kind, MessageType::Unsubscribed);
        assert_eq!(manager.channel_subscribers("job:xyz"), 0);

        let msg = WsMessage::new(MessageType::JobProgress, Some("job:xyz".into()), json!({}));
        assert_eq!(manager.broadcast("job:xyz", &msg), 0);
        // Never-existing channel behaves the same.
        assert_eq!(manager.broadcast("job:never", &msg), 0);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let manager = ChannelManager::new();
        let (a, _rx) = connect(&manager);
        manager.subscribe(a, "job:abc");

        manager.disconnect(a);
        manager.disconnect(a);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.channel_subscribers("job:abc"), 0);
    }

    #[test]
    fn test_dead_subscriber_dropped_after_pass() {
        let manager = ChannelManager::new();
        let (a, rx_a) = connect(&manager);
        let (b, mut rx_b) = connect(&manager);
        manager.subscribe(a, "jobs");
        manager.subscribe(b, "jobs");
        rx_b.try_recv().unwrap();

        // Kill a's socket side without telling the manager.
        drop(rx_a);

        let msg = WsMessage::new(MessageType::JobStarted, Some("jobs".into()), json!({}));
        assert_eq!(manager.broadcast("jobs", &msg), 1);
        assert_eq!(rx_b.try_recv().unwrap().kind, MessageType::JobStarted);
        // The failed subscriber was evicted entirely.
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.channel_subscribers("jobs"), 1);
    }

    #[test]
    fn test_broadcast_all_ignores_channels() {
        let manager = ChannelManager::new();
        let (_a, mut rx_a) = connect(&manager);
        let (b, mut rx_b) = connect(&manager);
        manager.subscribe(b, "job:abc");
        rx_b.try_recv().unwrap();

        let msg = WsMessage::new(MessageType::Ping, None, json!({}));
        assert_eq!(manager.broadcast_all(&msg), 2);
        assert_eq!(rx_a.try_recv().unwrap().kind, MessageType::Ping);
        assert_eq!(rx_b.try_recv().unwrap().kind, MessageType::Ping);
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let manager = ChannelManager::new();
        let msg = WsMessage::new(MessageType::Pong, None, json!({}));
        assert!(!manager.send_to(999, msg));
    }

    #[test]
    fn test_wire_shape() {
        let msg = WsMessage::new(
            MessageType::JobCompleted,
            Some("job:training_abc".into()),
            json!({"progress": 100.0}),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "job_completed");
        assert_eq!(value["channel"], "job:training_abc");
        assert_eq!(value["data"]["progress"], 100.0);
        assert!(value["timestamp"].is_string());
    }
}
