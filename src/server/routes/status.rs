use axum::extract::State;
use axum::Json;

use crate::orchestrator::{Health, RuntimeStatus};

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.orchestrator.health())
}

pub async fn runtime_status(State(state): State<AppState>) -> Json<RuntimeStatus> {
    Json(state.orchestrator.status().await)
}
