//! Server-Sent-Events stream of booking changes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::BusinessId;
use futures_util::{Stream, StreamExt};
use store::BookingStore;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

/// GET /businesses/:business_id/bookings/stream
///
/// Emits a `booking` event for every change to one of the business's
/// bookings. Delivery is best effort: a listener that falls behind skips
/// the updates it missed.
pub async fn bookings<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(business_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let business_id: BusinessId = parse_id(&business_id, "business")?;
    tracing::debug!(%business_id, "booking stream opened");

    let stream = BroadcastStream::new(state.updates.subscribe()).filter_map(move |result| async move {
        match result {
            Ok(update) if update.business_id == business_id => {
                match Event::default().event("booking").json_data(&update) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        tracing::warn!(error = %e, "booking update not encodable");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(%business_id, missed, "booking stream lagged");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
