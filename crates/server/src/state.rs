// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use trainyard_jobs::{JobExecutor, JobStore};

use crate::channels::ChannelManager;
use crate::config::ServerConfig;

/// Shared application state accessible from all route handlers.
///
/// This is the single composition point: the store, executor, and channel
/// manager are constructed once here and injected everywhere else — there is
/// no process-wide singleton behind the scenes.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job records and their lifecycle.
    pub store: Arc<JobStore>,
    /// Bounded worker pool running job task functions.
    pub executor: JobExecutor,
    /// Live WebSocket connections and their channel subscriptions.
    pub channels: Arc<ChannelManager>,
    pub config: ServerConfig,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let store = Arc::new(JobStore::new());
        let executor = JobExecutor::new(Arc::clone(&store), config.workers);
        Arc::new(Self {
            start_time: Instant::now(),
            store,
            executor,
            channels: Arc::new(ChannelManager::new()),
            config,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_construction() {
        let state = AppState::new(ServerConfig::default());
        assert!(state.store.get("training_none").is_none());
        assert_eq!(state.channels.connection_count(), 0);
    }
}
