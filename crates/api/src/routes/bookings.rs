//! Checkout and booking endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::{BookingId, BusinessId, CustomerId, HoldId};
use domain::{
    Booking, BookingItem, BookingStatus, CustomerContact, Money, Payment, PriceQuote,
    SubmittedPricing, TimeWindow,
};
use engine::{MaterializeRequest, PaymentIntent};
use serde::{Deserialize, Serialize};
use store::{BookingEventRecord, BookingStore};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub customer: CustomerContact,
    pub pricing: SubmittedPricing,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub booking_id: BookingId,
    pub status: BookingStatus,
    pub amount_due: Money,
    pub currency: String,
    pub pricing: PriceQuote,
    pub expires_at: Option<DateTime<Utc>>,
    pub payment: Option<PaymentIntent>,
}

#[derive(Serialize)]
pub struct BookingResponse {
    pub id: BookingId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub hold_id: HoldId,
    /// Status as of now; a lapsed HOLD or PENDING booking reads EXPIRED.
    pub status: BookingStatus,
    pub window: TimeWindow,
    pub timezone: Tz,
    pub items: Vec<BookingItem>,
    pub pricing: PriceQuote,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingResponse {
    fn new(booking: Booking, now: DateTime<Utc>) -> Self {
        let status = booking.effective_status(now);
        Self {
            id: booking.id,
            business_id: booking.business_id,
            customer_id: booking.customer_id,
            hold_id: booking.hold_id,
            status,
            window: booking.window,
            timezone: booking.timezone,
            items: booking.items,
            pricing: booking.pricing,
            currency: booking.currency,
            expires_at: booking.expires_at,
            payment_ref: booking.payment_ref,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

// -- Handlers --

/// POST /holds/:hold_id/booking: turn a live hold into a booking and open
/// its payment. Retrying returns the same booking and payment handle.
#[tracing::instrument(skip(state, req))]
pub async fn materialize<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(hold_id): Path<String>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let hold_id: HoldId = parse_id(&hold_id, "hold")?;

    let result = state
        .engine
        .materializer
        .materialize(MaterializeRequest {
            hold_id,
            customer: req.customer,
            pricing: req.pricing,
            coupon_code: req.coupon_code,
        })
        .await?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let booking = result.booking;
    Ok((
        status,
        Json(CheckoutResponse {
            booking_id: booking.id,
            status: booking.effective_status(state.engine.clock().now()),
            amount_due: booking.pricing.amount_due,
            currency: booking.currency,
            pricing: booking.pricing,
            expires_at: booking.expires_at,
            payment: result.payment,
        }),
    ))
}

/// GET /bookings/:booking_id
#[tracing::instrument(skip(state))]
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking_id: BookingId = parse_id(&booking_id, "booking")?;
    let booking = state.engine.booking(booking_id).await?;
    Ok(Json(BookingResponse::new(booking, state.engine.clock().now())))
}

/// GET /bookings/:booking_id/events: the booking's audit log, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Vec<BookingEventRecord>>, ApiError> {
    let booking_id: BookingId = parse_id(&booking_id, "booking")?;
    Ok(Json(state.engine.booking_events(booking_id).await?))
}

/// GET /bookings/:booking_id/payments
#[tracing::instrument(skip(state))]
pub async fn payments<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let booking_id: BookingId = parse_id(&booking_id, "booking")?;
    Ok(Json(state.engine.payments(booking_id).await?))
}

/// POST /bookings/:booking_id/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(booking_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking_id: BookingId = parse_id(&booking_id, "booking")?;
    let reason = req.reason.unwrap_or_else(|| "cancelled by operator".to_string());
    let booking = state.engine.cancel_booking(booking_id, &reason).await?;
    Ok(Json(BookingResponse::new(booking, state.engine.clock().now())))
}
