use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, BusinessId, CouponId, CustomerId, HoldId};
use domain::{
    Aggregate, Booking, BookingEvent, BookingStatus, BusinessPolicy, CapacityError, Claim,
    ClaimSource, Coupon, Customer, CustomerContact, ExpiryReason, Hold, Ignored, InventoryItem,
    ItemQuantity, Money, Payment, PaymentDecision, PaymentEvent, PaymentStatus, PriceLine,
    PriceQuote, TimeWindow, Waiver, ensure_capacity,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Input for materializing a hold into a booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub hold_id: HoldId,
    pub contact: CustomerContact,
    /// Price snapshot per line, in hold line order.
    pub lines: Vec<PriceLine>,
    pub quote: PriceQuote,
    pub currency: String,
    pub coupon_id: Option<CouponId>,
    /// End of the booking's HOLD claim.
    pub expires_at: DateTime<Utc>,
}

/// Result of materializing a hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// A new booking was written and the hold consumed.
    Created(Booking),
    /// The hold had already been materialized; this is that booking.
    Existing(Booking),
}

impl Materialized {
    pub fn booking(&self) -> &Booking {
        match self {
            Materialized::Created(b) | Materialized::Existing(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            Materialized::Created(b) | Materialized::Existing(b) => b,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Materialized::Created(_))
    }
}

/// A payment attempt opened with the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub provider_payment_id: String,
    pub amount: Money,
    pub currency: String,
}

/// One entry of a booking's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingEventRecord {
    /// Store-wide append order.
    pub sequence: i64,
    pub event_type: String,
    pub event: BookingEvent,
    pub recorded_at: DateTime<Utc>,
}

/// What a payment event did to its booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirmed { revived: bool },
    Expired,
    /// Only the ledger was touched.
    Unchanged(Ignored),
}

/// Result of a payment event that was not a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPaymentEvent {
    pub booking: Booking,
    pub previous_status: BookingStatus,
    pub transition: Transition,
    /// Side effects enqueued by this event, to dispatch after commit.
    pub side_effects: Vec<SideEffectKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event id was seen before or the outcome is already recorded.
    Duplicate,
    Applied(AppliedPaymentEvent),
}

/// Work owed after a booking is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectKind {
    Waiver,
    ConfirmationEmail,
}

impl SideEffectKind {
    /// Enqueued for every confirmation.
    pub const ON_CONFIRM: [SideEffectKind; 2] =
        [SideEffectKind::Waiver, SideEffectKind::ConfirmationEmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectKind::Waiver => "waiver",
            SideEffectKind::ConfirmationEmail => "confirmation_email",
        }
    }
}

impl fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SideEffectKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiver" => Ok(SideEffectKind::Waiver),
            "confirmation_email" => Ok(SideEffectKind::ConfirmationEmail),
            _ => Err(format!("Unknown side effect kind: {s}")),
        }
    }
}

/// An outbox row that has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffect {
    pub booking_id: BookingId,
    pub kind: SideEffectKind,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Waiver document issued for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiverUpsert {
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub booking_id: BookingId,
    pub document_id: String,
    pub document_url: String,
}

/// What one reaper pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub holds_deleted: u64,
    /// Bookings whose lapse was written down in this pass.
    pub expired_bookings: Vec<Booking>,
    pub payments_expired: u64,
}

/// Transactional storage for holds, bookings and the payment ledger.
///
/// Operations that grant or consume capacity are serialized per inventory
/// item, so concurrent callers cannot both see the last unit as free.
#[async_trait]
pub trait BookingStore: Send + Sync {
    // Reference data

    async fn put_inventory_item(&self, item: InventoryItem) -> Result<()>;

    async fn list_inventory(&self, business_id: BusinessId) -> Result<Vec<InventoryItem>>;

    async fn put_business_policy(&self, business_id: BusinessId, policy: BusinessPolicy)
    -> Result<()>;

    /// Stored policy, if the business has one.
    async fn business_policy(&self, business_id: BusinessId) -> Result<Option<BusinessPolicy>>;

    async fn put_coupon(&self, coupon: Coupon) -> Result<()>;

    /// Case-insensitive code lookup.
    async fn find_coupon(&self, business_id: BusinessId, code: &str) -> Result<Option<Coupon>>;

    // Capacity

    /// Live claims of holds and bookings whose raw window intersects `range`.
    async fn claims_overlapping(
        &self,
        business_id: BusinessId,
        range: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Claim>>;

    /// Re-checks capacity under per-item locks and inserts the hold.
    ///
    /// Fails with [`StoreError::Capacity`](crate::StoreError::Capacity)
    /// listing every line that does not fit.
    async fn create_hold(&self, hold: Hold, now: DateTime<Utc>) -> Result<Hold>;

    async fn get_hold(&self, hold_id: HoldId) -> Result<Option<Hold>>;

    /// Deletes the hold. Returns false if it did not exist.
    async fn release_hold(&self, hold_id: HoldId) -> Result<bool>;

    // Bookings

    /// Turns a live hold into a HOLD booking, at most once per hold.
    ///
    /// Upserts the customer by (business, email), writes the booking with
    /// its items and `BookingCreated` event, and deletes the hold, all in
    /// one transaction.
    async fn materialize_booking(&self, new: NewBooking, now: DateTime<Utc>)
    -> Result<Materialized>;

    /// HOLD → PENDING, recording a PENDING ledger row for the attempt.
    ///
    /// Calling again with the booking's current attempt returns the booking
    /// unchanged.
    async fn mark_payment_initiated(
        &self,
        booking_id: BookingId,
        attempt: PaymentAttempt,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Booking>;

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>>;

    async fn booking_events(&self, booking_id: BookingId) -> Result<Vec<BookingEventRecord>>;

    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking>;

    // Payments

    async fn payments_for_booking(&self, booking_id: BookingId) -> Result<Vec<Payment>>;

    async fn find_payment(&self, provider_payment_id: &str) -> Result<Option<Payment>>;

    /// Applies one provider event to its booking in a single transaction.
    ///
    /// Records the event id, upserts the ledger row, performs the status
    /// transition, and on confirmation updates customer statistics and
    /// coupon usage and enqueues side effects. A missing booking fails
    /// without recording anything.
    async fn apply_payment_event(
        &self,
        booking_id: BookingId,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome>;

    // Customers and waivers

    async fn get_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>>;

    async fn find_customer(&self, business_id: BusinessId, email: &str)
    -> Result<Option<Customer>>;

    /// One waiver per (customer, business, booking); re-issuing replaces
    /// the document reference.
    async fn upsert_waiver(&self, waiver: WaiverUpsert, now: DateTime<Utc>) -> Result<Waiver>;

    async fn find_waiver(&self, booking_id: BookingId) -> Result<Option<Waiver>>;

    // Side-effect outbox

    /// Oldest incomplete side effects first.
    async fn pending_side_effects(&self, limit: usize) -> Result<Vec<SideEffect>>;

    async fn complete_side_effect(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_side_effect_failure(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        error: &str,
    ) -> Result<()>;

    // Maintenance

    /// Deletes lapsed holds, writes down lapsed HOLD/PENDING bookings as
    /// EXPIRED and marks their PENDING payments EXPIRED.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<ReapReport>;
}

/// Ledger change for the event's payment id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LedgerWrite {
    Insert(Payment),
    Update(PaymentStatus),
    Skip,
}

/// Everything a store must write for one non-duplicate payment event.
#[derive(Debug, Clone)]
pub(crate) struct PaymentPlan {
    pub booking: Booking,
    pub events: Vec<BookingEvent>,
    pub transition: Transition,
    pub ledger: LedgerWrite,
    /// Amount credited to the customer when the booking was confirmed.
    pub confirmed_amount: Option<Money>,
}

impl PaymentPlan {
    pub fn side_effects(&self) -> Vec<SideEffectKind> {
        if self.confirmed_amount.is_some() {
            SideEffectKind::ON_CONFIRM.to_vec()
        } else {
            Vec::new()
        }
    }
}

/// Checks that an expired booking's lines still fit once nothing of its own
/// is counted. `claims` may include the booking's own claims.
pub(crate) fn check_revival_capacity(
    booking: &Booking,
    items: &[InventoryItem],
    claims: &[Claim],
    policy: &BusinessPolicy,
    now: DateTime<Utc>,
) -> std::result::Result<(), CapacityError> {
    let own = ClaimSource::Booking(booking.id);
    let others: Vec<Claim> = claims.iter().filter(|c| c.source != own).cloned().collect();
    let wanted: Vec<ItemQuantity> = booking
        .items
        .iter()
        .map(|item| ItemQuantity::new(item.inventory_item_id, item.quantity))
        .collect();
    ensure_capacity(items, &others, &booking.window, &wanted, policy, now)
}

/// Works out the writes for a payment event.
///
/// `decision` is the booking's own decision, already downgraded to
/// `Record(CapacityLost)` by the caller if a revival no longer fits.
/// Returns `None` for duplicates.
pub(crate) fn plan_payment_event(
    mut booking: Booking,
    event: &PaymentEvent,
    prior: Option<&Payment>,
    decision: PaymentDecision,
    now: DateTime<Utc>,
) -> Result<Option<PaymentPlan>> {
    let mut events = Vec::new();
    let transition = match decision {
        PaymentDecision::Duplicate => return Ok(None),
        PaymentDecision::Confirm { revive } => {
            events.push(booking.confirm(event.payment_ref.clone(), now)?);
            Transition::Confirmed { revived: revive }
        }
        PaymentDecision::Expire => {
            let reason = ExpiryReason::PaymentFailed {
                payment_ref: event.payment_ref.clone(),
            };
            events.push(booking.expire(reason, now)?);
            Transition::Expired
        }
        PaymentDecision::Record(ignored) => {
            // a late payment that lost its capacity still writes the lapse down
            if ignored == Ignored::CapacityLost && booking.status.can_expire() {
                events.push(booking.expire(ExpiryReason::TimedOut, now)?);
            }
            Transition::Unchanged(ignored)
        }
    };

    for e in &events {
        booking.apply(e);
    }

    let amount = event.amount.unwrap_or(booking.pricing.amount_due);
    let ledger = match (event.outcome, prior) {
        (None, _) => LedgerWrite::Skip,
        (Some(outcome), None) => LedgerWrite::Insert(Payment {
            id: common::PaymentId::new(),
            booking_id: booking.id,
            business_id: booking.business_id,
            provider_payment_id: event.payment_ref.clone(),
            amount,
            currency: event
                .currency
                .clone()
                .unwrap_or_else(|| booking.currency.clone()),
            status: outcome.status(),
            created_at: now,
            updated_at: now,
        }),
        (Some(outcome), Some(prior)) if prior.status.can_become(outcome.status()) => {
            LedgerWrite::Update(outcome.status())
        }
        (Some(_), Some(_)) => LedgerWrite::Skip,
    };

    let confirmed_amount =
        matches!(transition, Transition::Confirmed { .. }).then_some(amount);

    Ok(Some(PaymentPlan {
        booking,
        events,
        transition,
        ledger,
        confirmed_amount,
    }))
}
