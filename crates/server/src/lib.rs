// crates/server/src/lib.rs
//! Trainyard server library.
//!
//! Axum-based backend exposing ML pipeline background jobs over HTTP and
//! WebSocket: job CRUD-ish routes under `/api`, an SSE event stream, and a
//! `/ws` endpoint with channel-based subscriptions. The job core itself
//! lives in `trainyard-jobs`; this crate is the transport and composition
//! layer around it.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::AppState;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware, and spawn the
/// background machinery (notification bridge, cleanup sweep) tied to this
/// state.
pub fn app(state: Arc<AppState>) -> Router {
    bridge::spawn_bridge(Arc::clone(&state.store), Arc::clone(&state.channels));

    // Periodic eviction of old terminal jobs.
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let interval = Duration::from_secs(sweep_state.config.cleanup_interval_secs.max(1));
        let max_age = chrono::Duration::hours(sweep_state.config.cleanup_max_age_hours);
        loop {
            tokio::time::sleep(interval).await;
            let removed = sweep_state.store.cleanup(max_age);
            if removed > 0 {
                tracing::info!(removed, "cleaned up old terminal jobs");
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::api_routes())
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
