use axum::{extract::State, routing::get, Json, Router};
use camhive_core::InferenceStatsSnapshot;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct Metrics {
    pub inference: InferenceStatsSnapshot,
    pub command_subscribers: usize,
    pub capture_subscribers: usize,
    pub scheduler_running: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_metrics))
}

async fn get_metrics(State(state): State<AppState>) -> Json<Metrics> {
    Json(Metrics {
        inference: state.inference.stats(),
        command_subscribers: state.commands.total_subscribers(),
        capture_subscribers: state.captures.total_subscribers(),
        scheduler_running: state.scheduler.is_running(),
    })
}
