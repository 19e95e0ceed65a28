// Presentation layer - Operator control API
pub mod app_state;
pub mod handlers;

use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{get_state, health_check, list_clients, put_state};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/state", get(get_state).put(put_state))
        .route("/clients", get(list_clients))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
