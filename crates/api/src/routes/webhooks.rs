//! Payment provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use engine::EventReceipt;
use engine::webhook::{parse_event, verify_signature};
use serde::Serialize;
use store::BookingStore;

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub receipt: &'static str,
}

fn receipt_name(receipt: EventReceipt) -> &'static str {
    match receipt {
        EventReceipt::Applied(_) => "applied",
        EventReceipt::Duplicate => "duplicate",
        EventReceipt::Skipped => "skipped",
        EventReceipt::Failed => "failed",
    }
}

/// POST /webhooks/payments
///
/// An unverifiable delivery is answered 400. Everything after that is
/// acknowledged with 200, including deliveries that failed to process:
/// those are logged and alerted on instead of being redelivered.
#[tracing::instrument(skip_all)]
pub async fn payments<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    match state.webhook_secret.as_deref() {
        Some(secret) => {
            let header = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    metrics::counter!("webhook_signature_rejections_total").increment(1);
                    ApiError::BadRequest("Missing signature header".to_string())
                })?;
            verify_signature(&body, header, secret, state.engine.clock().now()).map_err(|e| {
                metrics::counter!("webhook_signature_rejections_total").increment(1);
                tracing::warn!(error = %e, "webhook signature rejected");
                ApiError::BadRequest(e.to_string())
            })?;
        }
        None => tracing::warn!("webhook secret not configured, skipping signature verification"),
    }

    let receipt = match parse_event(&body) {
        Ok(event) => state.engine.reconciler.on_payment_event(&event).await,
        Err(e) => {
            metrics::counter!("payment_event_failures_total").increment(1);
            tracing::error!(alert = true, error = %e, "unreadable payment webhook acknowledged");
            EventReceipt::Failed
        }
    };

    Ok(Json(WebhookAck {
        received: true,
        receipt: receipt_name(receipt),
    }))
}
