pub mod captures;
pub mod devices;
pub mod metrics;

use std::convert::Infallible;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use axum::response::sse::Event;
use axum::Router;
use camhive_bus::{Delivery, Subscription};
use camhive_schema::DeviceStreamEvent;
use futures_core::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/devices", devices::router())
        .nest("/captures", captures::router())
        .nest("/metrics", metrics::router())
}

fn sse_frame<T: Serialize>(value: &T) -> Option<Event> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            tracing::warn!("failed to encode stream frame: {e}");
            None
        }
    }
}

/// Pump a hub subscription into SSE frames: `greeting` first, then one frame
/// per message, and a ping whenever `poll` passes in silence. Ends when the
/// hub closes or `shutdown` fires; dropping the stream unsubscribes.
fn subscription_stream<K, T>(
    mut subscription: Subscription<K, T>,
    greeting: Option<Event>,
    poll: Duration,
    shutdown: CancellationToken,
    label: String,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    K: Eq + Hash + Debug + Send + 'static,
    T: Serialize + Send + 'static,
{
    async_stream::stream! {
        if let Some(greeting) = greeting {
            yield Ok(greeting);
        }
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = subscription.recv_timeout(poll) => delivery,
            };
            match delivery {
                Delivery::Message(message) => {
                    if let Some(frame) = sse_frame(&message) {
                        yield Ok(frame);
                    }
                }
                Delivery::Timeout => {
                    if let Some(frame) = sse_frame(&DeviceStreamEvent::Ping) {
                        yield Ok(frame);
                    }
                }
                Delivery::Shutdown => break,
            }
        }
        tracing::info!(stream = %label, key = ?subscription.key(), "stream closed");
    }
}
