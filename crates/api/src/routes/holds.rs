//! Hold placement and release endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{BusinessId, HoldId};
use domain::{ItemQuantity, TimeWindow};
use serde::{Deserialize, Serialize};
use store::BookingStore;

use super::{WindowParams, parse_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateHoldRequest {
    #[serde(flatten)]
    pub window: WindowParams,
    pub items: Vec<ItemQuantity>,
}

#[derive(Serialize)]
pub struct HoldResponse {
    pub hold_id: HoldId,
    pub expires_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub items: Vec<ItemQuantity>,
}

/// POST /businesses/:business_id/holds: claim items for a window.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(business_id): Path<String>,
    Json(req): Json<CreateHoldRequest>,
) -> Result<(StatusCode, Json<HoldResponse>), ApiError> {
    let business_id: BusinessId = parse_id(&business_id, "business")?;
    let window = req.window.to_window()?;

    let hold = state
        .engine
        .ledger
        .create_hold(business_id, &window, &req.items)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(HoldResponse {
            hold_id: hold.id,
            expires_at: hold.expires_at,
            window: hold.window,
            items: hold.lines,
        }),
    ))
}

/// DELETE /holds/:hold_id: give the claimed items back. Idempotent.
#[tracing::instrument(skip(state))]
pub async fn release<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(hold_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let hold_id: HoldId = parse_id(&hold_id, "hold")?;
    state.engine.ledger.release_hold(hold_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
