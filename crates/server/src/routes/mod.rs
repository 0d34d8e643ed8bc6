//! API route handlers for the trainyard server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// All routes mounted under `/api`.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().merge(health::router()).merge(jobs::router())
}
