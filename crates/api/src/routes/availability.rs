//! Availability search endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::BusinessId;
use domain::{ItemAvailability, TimeWindow};
use serde::Serialize;
use store::BookingStore;

use super::{WindowParams, parse_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub business_id: BusinessId,
    /// The searched window in UTC.
    pub window: TimeWindow,
    pub items: Vec<ItemAvailability>,
}

/// GET /businesses/:business_id/availability?date&start&end&timezone
#[tracing::instrument(skip(state, params))]
pub async fn search<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(business_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let business_id: BusinessId = parse_id(&business_id, "business")?;
    let window = params.to_window()?;
    let utc = window
        .to_utc()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let items = state.engine.resolver.search(business_id, &window).await?;

    Ok(Json(AvailabilityResponse {
        business_id,
        window: utc,
        items,
    }))
}
