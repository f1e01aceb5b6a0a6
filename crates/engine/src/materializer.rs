//! Turning holds into bookings.

use std::sync::Arc;

use common::{BookingId, HoldId};
use domain::{
    Booking, BookingStatus, Coupon, CouponRejection, CustomerContact, DomainError, Hold,
    PriceLine, PriceQuote, SubmittedPricing,
};
use serde::Serialize;
use store::{BookingStore, NewBooking, PaymentAttempt};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::resolver::policy_for;
use crate::services::{IntentRequest, PaymentGateway, PaymentIntent};
use crate::settings::EngineSettings;

/// What the client submits at checkout.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub hold_id: HoldId,
    pub customer: CustomerContact,
    /// The client's own arithmetic; checked, never charged.
    pub pricing: SubmittedPricing,
    pub coupon_code: Option<String>,
}

/// A booking plus the handle the client pays against.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedBooking {
    pub booking: Booking,
    /// Absent once the booking no longer takes payment.
    pub payment: Option<PaymentIntent>,
    /// False when a retry found the booking already in place.
    pub created: bool,
}

/// Converts a live hold into exactly one booking and opens its payment.
pub struct BookingMaterializer<S> {
    store: S,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    settings: EngineSettings,
}

impl<S: BookingStore + Clone> BookingMaterializer<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            gateway,
            settings,
        }
    }

    /// Materializes the hold, or resumes the booking an earlier call made.
    ///
    /// The booking is committed in HOLD status first. Only then is the
    /// payment intent requested, and a second write moves the booking to
    /// PENDING. A gateway failure leaves the booking in HOLD, and retrying
    /// the same request picks up from there.
    #[tracing::instrument(skip(self, request), fields(hold_id = %request.hold_id))]
    pub async fn materialize(&self, request: MaterializeRequest) -> Result<MaterializedBooking> {
        let booking_id = BookingId::for_hold(request.hold_id);
        if let Some(existing) = self.store.get_booking(booking_id).await? {
            tracing::info!(%booking_id, status = %existing.status, "resuming existing booking");
            return self.open_payment(existing, false).await;
        }

        let now = self.clock.now();
        let hold = self
            .store
            .get_hold(request.hold_id)
            .await?
            .filter(|hold| hold.is_live(now))
            .ok_or(EngineError::HoldExpired(request.hold_id))?;

        request.customer.validate().map_err(DomainError::from)?;

        let lines = self.price_lines(&hold).await?;
        let coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(self.usable_coupon(&hold, code).await?),
            None => None,
        };
        let policy = policy_for(&self.store, hold.business_id).await?;
        let quote = PriceQuote::compute(&lines, &policy, coupon.as_ref());
        quote.verify(&request.pricing).map_err(DomainError::from)?;

        let materialized = self
            .store
            .materialize_booking(
                NewBooking {
                    hold_id: hold.id,
                    contact: request.customer,
                    lines,
                    quote,
                    currency: self.settings.currency.clone(),
                    coupon_id: coupon.map(|c| c.id),
                    expires_at: now + self.settings.hold_ttl,
                },
                now,
            )
            .await?;

        let created = materialized.is_created();
        if created {
            metrics::counter!("bookings_materialized_total").increment(1);
            tracing::info!(
                booking_id = %materialized.booking().id,
                amount_due = %quote.amount_due,
                "booking materialized"
            );
        }
        self.open_payment(materialized.into_booking(), created).await
    }

    async fn price_lines(&self, hold: &Hold) -> Result<Vec<PriceLine>> {
        let inventory = self.store.list_inventory(hold.business_id).await?;
        hold.lines
            .iter()
            .map(|line| {
                inventory
                    .iter()
                    .find(|item| item.id == line.inventory_item_id)
                    .map(|item| PriceLine {
                        inventory_item_id: item.id,
                        name: item.name.clone(),
                        unit_price: item.price,
                        quantity: line.quantity,
                    })
                    .ok_or_else(|| {
                        EngineError::InvalidRequest(format!(
                            "inventory item {} is no longer offered",
                            line.inventory_item_id
                        ))
                    })
            })
            .collect()
    }

    async fn usable_coupon(&self, hold: &Hold, code: &str) -> Result<Coupon> {
        let now = self.clock.now();
        let rejected = |reason| EngineError::CouponRejected {
            code: code.to_string(),
            reason,
        };
        let coupon = self
            .store
            .find_coupon(hold.business_id, code)
            .await?
            .ok_or_else(|| rejected(CouponRejection::NotFound))?;
        coupon.validate(now).map_err(rejected)?;
        Ok(coupon)
    }

    /// Opens (or re-opens) the charge for a booking that still takes payment.
    async fn open_payment(&self, booking: Booking, created: bool) -> Result<MaterializedBooking> {
        let now = self.clock.now();
        match booking.effective_status(now) {
            BookingStatus::Hold | BookingStatus::Pending => {}
            BookingStatus::Expired => return Err(EngineError::HoldExpired(booking.hold_id)),
            BookingStatus::Confirmed | BookingStatus::Cancelled => {
                return Ok(MaterializedBooking {
                    booking,
                    payment: None,
                    created,
                });
            }
        }

        let intent = self
            .gateway
            .create_intent(IntentRequest {
                booking_id: booking.id,
                business_id: booking.business_id,
                amount: booking.pricing.amount_due,
                currency: booking.currency.clone(),
                idempotency_key: booking.id.to_string(),
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(booking_id = %booking.id, error = %e, "payment intent failed, booking stays on hold");
            })?;

        let booking = if booking.status == BookingStatus::Hold {
            self.store
                .mark_payment_initiated(
                    booking.id,
                    PaymentAttempt {
                        provider_payment_id: intent.provider_payment_id.clone(),
                        amount: booking.pricing.amount_due,
                        currency: booking.currency.clone(),
                    },
                    now + self.settings.pending_ttl,
                    now,
                )
                .await?
        } else {
            booking
        };

        Ok(MaterializedBooking {
            booking,
            payment: Some(intent),
            created,
        })
    }
}
