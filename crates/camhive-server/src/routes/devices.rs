use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use camhive_core::RecentCapture;
use camhive_scheduler::TriggerRecord;
use camhive_schema::DeviceStreamEvent;
use futures_core::Stream;

use super::{sse_frame, subscription_stream};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{device_id}/commands", get(command_stream))
        .route("/{device_id}/capture", post(trigger_capture))
        .route("/{device_id}/captures/recent", get(recent_captures))
}

/// Long-lived command channel a device holds open to receive capture orders.
async fn command_stream(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.commands.subscribe(&device_id);
    tracing::info!(device_id = %device_id, "device command stream opened");

    let greeting = sse_frame(&DeviceStreamEvent::Connected {
        device_id: device_id.clone(),
    });
    Sse::new(subscription_stream(
        subscription,
        greeting,
        state.stream_poll,
        state.shutdown.clone(),
        format!("commands:{device_id}"),
    ))
}

async fn trigger_capture(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<TriggerRecord>> {
    if state.devices.get_device(&device_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("device {device_id}")));
    }
    let record = state.scheduler.trigger_manual_capture(&device_id).await?;
    Ok(Json(record))
}

async fn recent_captures(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<Vec<RecentCapture>> {
    Json(state.inference.recent_captures(&device_id))
}
