// crates/server/src/config.rs
//! CLI configuration for the trainyard server binary.

use clap::Parser;

/// Backend serving ML pipeline job management over HTTP and WebSocket.
#[derive(Debug, Clone, Parser)]
#[command(name = "trainyard", version, about)]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    pub port: u16,

    /// Bind address.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Maximum number of simultaneously running jobs. This is a deployment
    /// concurrency cap, not derived from any job's own needs.
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Terminal jobs older than this many hours are evicted by the
    /// periodic cleanup sweep.
    #[arg(long, default_value_t = 24)]
    pub cleanup_max_age_hours: i64,

    /// How often the cleanup sweep runs, in seconds.
    #[arg(long, default_value_t = 3600)]
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::parse_from(["trainyard"])
    }
}
