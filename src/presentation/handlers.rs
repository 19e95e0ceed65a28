// HTTP request handlers for the hub control API
use crate::application::registry::SessionSummary;
use crate::domain::state::OperationalState;
use crate::presentation::app_state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct StateBody {
    pub state: OperationalState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateChangeResponse {
    pub state: OperationalState,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub expected: usize,
    pub sequence_index: usize,
    pub clients: Vec<SessionSummary>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateBody> {
    Json(StateBody {
        state: state.coordinator.operational_state().await,
    })
}

/// Operator request to change the global state; broadcast to panels immediately.
pub async fn put_state(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StateBody>,
) -> Json<StateChangeResponse> {
    let changed = state.coordinator.set_operational_state(body.state).await;
    Json(StateChangeResponse {
        state: body.state,
        changed,
    })
}

pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<ClientsResponse> {
    let coordinator = &state.coordinator;
    Json(ClientsResponse {
        expected: coordinator.expected_clients(),
        sequence_index: coordinator.sequence_index(),
        clients: coordinator.registry().summaries().await,
    })
}
