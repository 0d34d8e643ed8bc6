// crates/server/src/bridge.rs
//! Bridge from job store mutations to notification channels.
//!
//! Subscribes to the store's broadcast feed and fans each event out to the
//! per-job channel `job:{id}` plus the `jobs` firehose. The store side never
//! waits on delivery; a lagged receiver just skips what it missed.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use trainyard_jobs::{message_type_for, JobEvent, JobEventKind, JobStore};

use crate::channels::{ChannelManager, WsMessage};

/// Channel receiving every job event regardless of job id.
pub const FIREHOSE_CHANNEL: &str = "jobs";

/// Spawn the forwarding task. Runs until the store is dropped.
pub fn spawn_bridge(store: Arc<JobStore>, channels: Arc<ChannelManager>) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => forward(&channels, &event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification bridge lagged behind job events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Translate one job event into channel messages and deliver them.
fn forward(channels: &ChannelManager, event: &JobEvent) {
    let Some(kind) = message_type_for(event) else {
        return;
    };
    let data = match event.kind {
        JobEventKind::Metrics => json!({
            "job_id": event.job.id,
            "metrics": event.metrics_delta,
        }),
        JobEventKind::Lifecycle => match serde_json::to_value(&event.job) {
            Ok(value) => value,
            Err(e) => {
                warn!(job_id = %event.job.id, error = %e, "unserializable job event");
                return;
            }
        },
    };

    let job_channel = format!("job:{}", event.job.id);
    channels.broadcast(
        &job_channel,
        &WsMessage::new(kind, Some(job_channel.clone()), data.clone()),
    );
    channels.broadcast(
        FIREHOSE_CHANNEL,
        &WsMessage::new(kind, Some(FIREHOSE_CHANNEL.to_string()), data),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Map;
    use tokio::sync::mpsc;
    use trainyard_jobs::{JobType, MessageType};

    #[tokio::test]
    async fn test_bridge_forwards_lifecycle_to_job_channel() {
        let store = Arc::new(JobStore::new());
        let channels = Arc::new(ChannelManager::new());
        let _bridge = spawn_bridge(Arc::clone(&store), Arc::clone(&channels));

        let job = store.create(JobType::Training, Map::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = channels.connect(tx);
        rx.try_recv().unwrap(); // connected ack
        channels.subscribe(conn, &format!("job:{}", job.id));
        rx.try_recv().unwrap(); // subscribed ack

        store.cancel(&job.id);
        let msg = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout waiting for bridge message")
            .expect("channel closed");

        // Cancelled jobs go out as job_failed with the cancellation error.
        assert_eq!(msg.kind, MessageType::JobFailed);
        assert_eq!(msg.channel.as_deref(), Some(format!("job:{}", job.id).as_str()));
        assert_eq!(msg.data["id"], json!(job.id));
        assert_eq!(msg.data["status"], json!("cancelled"));
        assert!(msg.data["error"].as_str().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_bridge_forwards_metrics_to_firehose() {
        let store = Arc::new(JobStore::new());
        let channels = Arc::new(ChannelManager::new());
        let _bridge = spawn_bridge(Arc::clone(&store), Arc::clone(&channels));

        let job = store.create(JobType::Training, Map::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = channels.connect(tx);
        rx.try_recv().unwrap();
        channels.subscribe(conn, FIREHOSE_CHANNEL);
        rx.try_recv().unwrap();

        let mut delta = Map::new();
        delta.insert("loss".into(), json!(0.42));
        store.update_metrics(&job.id, delta, true);

        let msg = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout waiting for bridge message")
            .expect("channel closed");
        assert_eq!(msg.kind, MessageType::JobMetrics);
        assert_eq!(msg.channel.as_deref(), Some(FIREHOSE_CHANNEL));
        assert_eq!(msg.data["metrics"]["loss"], json!(0.42));
        assert_eq!(msg.data["job_id"], json!(job.id));
    }

    #[test]
    fn test_forward_without_subscribers_is_harmless() {
        let channels = ChannelManager::new();
        let store = JobStore::new();
        let job = store.create(JobType::Export, Map::new());
        store.cancel(&job.id);

        let event = JobEvent {
            job: store.get(&job.id).unwrap().summary(),
            kind: JobEventKind::Lifecycle,
            metrics_delta: Map::new(),
        };
        // No panic, no error — delivery is best-effort.
        forward(&channels, &event);
    }
}
