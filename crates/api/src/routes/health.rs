//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use store::BookingStore;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// The engine clock, which expiry decisions are made against.
    pub now: DateTime<Utc>,
    pub webhook_verification: bool,
}

/// GET /health: liveness plus the engine's view of time.
pub async fn check<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        now: state.engine.clock().now(),
        webhook_verification: state.webhook_secret.is_some(),
    })
}
