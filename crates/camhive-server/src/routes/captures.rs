use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use camhive_core::{CaptureOutcome, CapturePayload};
use futures_core::Stream;
use serde::Deserialize;

use super::subscription_stream;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_capture))
        .route("/stream", get(capture_stream))
}

async fn upload_capture(
    State(state): State<AppState>,
    Json(mut payload): Json<CapturePayload>,
) -> ApiResult<(StatusCode, Json<CaptureOutcome>)> {
    // Tenant comes from the registry; unregistered devices are still
    // classified but nobody is subscribed to hear about them.
    let device = match payload.device_id.trim() {
        "" => None,
        device_id => state.devices.get_device(device_id).await?,
    };
    if device.is_none() {
        tracing::warn!(device_id = %payload.device_id, "capture from unregistered device");
    }
    payload.tenant_id = device.map(|d| d.tenant_id);

    let trigger_id = payload
        .trigger_id
        .clone()
        .filter(|id| !id.trim().is_empty());
    let outcome = state.inference.process_capture(payload).await?;

    if let Some(trigger_id) = trigger_id {
        if let Err(e) = state
            .scheduler
            .mark_trigger_executed(&trigger_id, &outcome.record_id)
            .await
        {
            tracing::warn!(trigger_id, "failed to mark trigger executed: {e:#}");
        }
    }

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub tenant_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Operator feed of capture events for a tenant, optionally one device.
async fn capture_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let tenant_id = query.tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(ApiError::Validation("tenant_id is required".into()));
    }
    let device_id = query
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let subscription = state.captures.subscribe(tenant_id, device_id);
    tracing::info!(tenant_id, device_id = ?device_id, "capture stream opened");

    Ok(Sse::new(subscription_stream(
        subscription,
        None,
        state.stream_poll,
        state.shutdown.clone(),
        format!("captures:{tenant_id}"),
    )))
}
