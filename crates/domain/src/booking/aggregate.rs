//! The booking aggregate.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::{BookingId, BusinessId, CouponId, CustomerId, HoldId, InventoryItemId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::availability::{Claim, ClaimSource};
use crate::hold::Hold;
use crate::money::Money;
use crate::pricing::{PriceLine, PriceQuote};
use crate::window::TimeWindow;

use super::TransitionError;
use super::events::{
    BookingCancelledData, BookingConfirmedData, BookingCreatedData, BookingEvent,
    BookingExpiredData, ExpiryReason, PaymentInitiatedData,
};
use super::status::BookingStatus;

/// A booked line. Its status mirrors the parent booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    pub inventory_item_id: InventoryItemId,
    pub name: String,
    pub quantity: u32,
    /// Price snapshot taken at materialization.
    pub unit_price: Money,
    pub status: BookingStatus,
}

impl BookingItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Everything besides the hold needed to materialize a booking.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub customer_id: CustomerId,
    pub lines: Vec<PriceLine>,
    pub quote: PriceQuote,
    pub currency: String,
    pub coupon_id: Option<CouponId>,
    /// End of the booking's HOLD claim. The hold's claim is handed over in
    /// the same transaction, so capacity stays claimed without a gap.
    pub expires_at: DateTime<Utc>,
}

/// A durable booking.
///
/// Status changes go through the transition methods, which return the
/// event to persist; [`Aggregate::apply`] folds it into the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub hold_id: HoldId,
    pub window: TimeWindow,
    pub timezone: Tz,
    pub status: BookingStatus,
    pub items: Vec<BookingItem>,
    pub pricing: PriceQuote,
    pub currency: String,
    pub coupon_id: Option<CouponId>,
    /// Set while HOLD or PENDING.
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider id of the current payment attempt.
    pub payment_ref: Option<String>,
    /// Provider id of the payment that confirmed the booking.
    pub confirmed_payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Materializes a booking from a live hold.
    ///
    /// The booking id is derived from the hold id.
    pub fn from_hold(hold: &Hold, draft: BookingDraft, now: DateTime<Utc>) -> (Self, BookingEvent) {
        let id = BookingId::for_hold(hold.id);
        let items = draft
            .lines
            .into_iter()
            .map(|line| BookingItem {
                inventory_item_id: line.inventory_item_id,
                name: line.name,
                quantity: line.quantity,
                unit_price: line.unit_price,
                status: BookingStatus::Hold,
            })
            .collect();

        let booking = Self {
            id,
            business_id: hold.business_id,
            customer_id: draft.customer_id,
            hold_id: hold.id,
            window: hold.window,
            timezone: hold.timezone,
            status: BookingStatus::Hold,
            items,
            pricing: draft.quote,
            currency: draft.currency,
            coupon_id: draft.coupon_id,
            expires_at: Some(draft.expires_at),
            payment_ref: None,
            confirmed_payment_ref: None,
            created_at: now,
            updated_at: now,
        };

        let event = BookingEvent::BookingCreated(BookingCreatedData {
            booking_id: id,
            hold_id: hold.id,
            customer_id: booking.customer_id,
            total: booking.pricing.total,
            expires_at: draft.expires_at,
            created_at: now,
        });

        (booking, event)
    }

    /// Status as of `now`: a HOLD or PENDING booking past `expires_at` is
    /// EXPIRED whether or not that has been written yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> BookingStatus {
        match self.expires_at {
            Some(at) if self.status.is_provisional() && at <= now => BookingStatus::Expired,
            _ => self.status,
        }
    }

    /// Capacity claims held by this booking, empty once it no longer claims.
    pub fn claims(&self) -> Vec<Claim> {
        if !self.status.claims_capacity() {
            return Vec::new();
        }
        let expires_at = if self.status.is_provisional() {
            self.expires_at
        } else {
            None
        };
        self.items
            .iter()
            .map(|item| Claim {
                source: ClaimSource::Booking(self.id),
                inventory_item_id: item.inventory_item_id,
                quantity: item.quantity,
                window: self.window,
                expires_at,
            })
            .collect()
    }

    /// HOLD → PENDING with a new payment attempt.
    pub fn initiate_payment(
        &self,
        payment_ref: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BookingEvent, TransitionError> {
        let current = self.effective_status(now);
        if !current.can_initiate_payment() {
            return Err(TransitionError {
                from: current,
                action: "initiate payment",
            });
        }
        Ok(BookingEvent::PaymentInitiated(PaymentInitiatedData {
            payment_ref: payment_ref.into(),
            amount: self.pricing.amount_due,
            expires_at,
            initiated_at: now,
        }))
    }

    /// HOLD/PENDING (or EXPIRED, for a late payment) → CONFIRMED.
    ///
    /// Reviving an expired booking is only valid after capacity has been
    /// re-checked by the caller.
    pub fn confirm(
        &self,
        payment_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<BookingEvent, TransitionError> {
        let current = self.effective_status(now);
        if !current.can_confirm() {
            return Err(TransitionError {
                from: current,
                action: "confirm",
            });
        }
        Ok(BookingEvent::BookingConfirmed(BookingConfirmedData {
            payment_ref: payment_ref.into(),
            revived: current == BookingStatus::Expired,
            confirmed_at: now,
        }))
    }

    /// HOLD/PENDING → EXPIRED. Allowed after `expires_at` has passed, which
    /// is how passive expiry gets written down.
    pub fn expire(
        &self,
        reason: ExpiryReason,
        now: DateTime<Utc>,
    ) -> Result<BookingEvent, TransitionError> {
        if !self.status.can_expire() {
            return Err(TransitionError {
                from: self.status,
                action: "expire",
            });
        }
        Ok(BookingEvent::BookingExpired(BookingExpiredData {
            reason,
            expired_at: now,
        }))
    }

    pub fn cancel(
        &self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<BookingEvent, TransitionError> {
        let current = self.effective_status(now);
        if !current.can_cancel() {
            return Err(TransitionError {
                from: current,
                action: "cancel",
            });
        }
        Ok(BookingEvent::BookingCancelled(BookingCancelledData {
            reason: reason.into(),
            cancelled_at: now,
        }))
    }

    fn set_status(&mut self, status: BookingStatus, at: DateTime<Utc>) {
        self.status = status;
        for item in &mut self.items {
            item.status = status;
        }
        self.updated_at = at;
    }
}

impl Aggregate for Booking {
    type Event = BookingEvent;

    fn aggregate_type() -> &'static str {
        "Booking"
    }

    fn apply(&mut self, event: &BookingEvent) {
        match event {
            BookingEvent::BookingCreated(data) => {
                self.expires_at = Some(data.expires_at);
                self.set_status(BookingStatus::Hold, data.created_at);
            }
            BookingEvent::PaymentInitiated(data) => {
                self.payment_ref = Some(data.payment_ref.clone());
                self.expires_at = Some(data.expires_at);
                self.set_status(BookingStatus::Pending, data.initiated_at);
            }
            BookingEvent::BookingConfirmed(data) => {
                self.payment_ref = Some(data.payment_ref.clone());
                self.confirmed_payment_ref = Some(data.payment_ref.clone());
                self.expires_at = None;
                self.set_status(BookingStatus::Confirmed, data.confirmed_at);
            }
            BookingEvent::BookingExpired(data) => {
                self.expires_at = None;
                self.set_status(BookingStatus::Expired, data.expired_at);
            }
            BookingEvent::BookingCancelled(data) => {
                self.expires_at = None;
                self.set_status(BookingStatus::Cancelled, data.cancelled_at);
            }
        }
    }
}
