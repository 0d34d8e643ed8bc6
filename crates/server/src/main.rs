// crates/server/src/main.rs
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trainyard_server::{app, AppState, ServerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,trainyard_server=info,trainyard_jobs=info".into()),
        )
        .init();

    let config = ServerConfig::parse();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("valid bind address");

    let state = AppState::new(config);
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind server port");
    info!("trainyard listening on {addr}");
    axum::serve(listener, app).await.expect("server");
}
