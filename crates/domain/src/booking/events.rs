//! Booking audit events.

use chrono::{DateTime, Utc};
use common::{BookingId, CustomerId, HoldId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;

/// Events appended to a booking's audit log, one per transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingEvent {
    /// Booking was materialized from a hold.
    BookingCreated(BookingCreatedData),

    /// A payment attempt was opened with the provider.
    PaymentInitiated(PaymentInitiatedData),

    /// A successful payment confirmed the booking.
    BookingConfirmed(BookingConfirmedData),

    /// The booking lapsed or its payment failed.
    BookingExpired(BookingExpiredData),

    /// The booking was cancelled.
    BookingCancelled(BookingCancelledData),
}

impl BookingEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BookingEvent::BookingCreated(d) => d.created_at,
            BookingEvent::PaymentInitiated(d) => d.initiated_at,
            BookingEvent::BookingConfirmed(d) => d.confirmed_at,
            BookingEvent::BookingExpired(d) => d.expired_at,
            BookingEvent::BookingCancelled(d) => d.cancelled_at,
        }
    }
}

impl DomainEvent for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingCreated(_) => "BookingCreated",
            BookingEvent::PaymentInitiated(_) => "PaymentInitiated",
            BookingEvent::BookingConfirmed(_) => "BookingConfirmed",
            BookingEvent::BookingExpired(_) => "BookingExpired",
            BookingEvent::BookingCancelled(_) => "BookingCancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCreatedData {
    pub booking_id: BookingId,
    pub hold_id: HoldId,
    pub customer_id: CustomerId,
    pub total: Money,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiatedData {
    /// Provider payment id of the new attempt.
    pub payment_ref: String,
    pub amount: Money,
    pub expires_at: DateTime<Utc>,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmedData {
    /// Provider payment id that confirmed the booking.
    pub payment_ref: String,
    /// True when a late payment re-confirmed an expired booking.
    pub revived: bool,
    pub confirmed_at: DateTime<Utc>,
}

/// Why a booking expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The current payment attempt failed or was voided.
    PaymentFailed { payment_ref: String },
    /// `expires_at` elapsed without a confirming payment.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingExpiredData {
    #[serde(flatten)]
    pub reason: ExpiryReason,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}
