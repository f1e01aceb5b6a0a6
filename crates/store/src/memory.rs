use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, BusinessId, CouponId, CustomerId, HoldId, InventoryItemId, WaiverId};
use domain::{
    Aggregate, Booking, BookingDraft, BookingEvent, BusinessPolicy, Claim, Coupon, Customer,
    DomainEvent, ExpiryReason, Hold, InventoryItem, Payment, PaymentDecision, PaymentEvent,
    PaymentStatus, TimeWindow, Waiver, claim_search_range, ensure_capacity,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        AppliedPaymentEvent, BookingEventRecord, BookingStore, LedgerWrite, Materialized,
        NewBooking, PaymentAttempt, ReapReport, ReconcileOutcome, SideEffect, SideEffectKind,
        WaiverUpsert, check_revival_capacity, plan_payment_event,
    },
};

#[derive(Debug, Clone)]
struct OutboxRow {
    attempts: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    items: HashMap<InventoryItemId, InventoryItem>,
    policies: HashMap<BusinessId, BusinessPolicy>,
    coupons: HashMap<CouponId, Coupon>,
    holds: HashMap<HoldId, Hold>,
    customers: HashMap<CustomerId, Customer>,
    bookings: HashMap<BookingId, Booking>,
    events: HashMap<BookingId, Vec<BookingEventRecord>>,
    next_sequence: i64,
    /// Keyed by provider payment id.
    payments: HashMap<String, Payment>,
    processed_events: HashMap<String, BookingId>,
    waivers: HashMap<(CustomerId, BusinessId, BookingId), Waiver>,
    outbox: BTreeMap<(BookingId, SideEffectKind), OutboxRow>,
}

impl State {
    fn policy(&self, business_id: BusinessId) -> BusinessPolicy {
        self.policies.get(&business_id).cloned().unwrap_or_default()
    }

    fn inventory(&self, business_id: BusinessId) -> Vec<InventoryItem> {
        self.items
            .values()
            .filter(|item| item.business_id == business_id)
            .cloned()
            .collect()
    }

    fn claims(&self, business_id: BusinessId, range: &TimeWindow, now: DateTime<Utc>) -> Vec<Claim> {
        let holds = self
            .holds
            .values()
            .filter(|h| h.business_id == business_id && h.is_live(now) && h.window.overlaps(range))
            .flat_map(|h| h.claims());
        let bookings = self
            .bookings
            .values()
            .filter(|b| b.business_id == business_id && b.window.overlaps(range))
            .flat_map(|b| b.claims())
            .filter(|c| c.is_live(now));
        holds.chain(bookings).collect()
    }

    fn append(&mut self, booking_id: BookingId, event: BookingEvent, now: DateTime<Utc>) {
        self.next_sequence += 1;
        let record = BookingEventRecord {
            sequence: self.next_sequence,
            event_type: event.event_type().to_string(),
            event,
            recorded_at: now,
        };
        self.events.entry(booking_id).or_default().push(record);
    }

    fn upsert_customer(
        &mut self,
        business_id: BusinessId,
        new: &NewBooking,
        now: DateTime<Utc>,
    ) -> CustomerId {
        let email = new.contact.normalized_email();
        let existing = self
            .customers
            .values_mut()
            .find(|c| c.business_id == business_id && c.email == email);

        match existing {
            Some(customer) => {
                customer.name = new.contact.name.trim().to_string();
                if new.contact.phone.is_some() {
                    customer.phone = new.contact.phone.clone();
                }
                if new.contact.address.is_some() {
                    customer.address = new.contact.address.clone();
                }
                customer.id
            }
            None => {
                let customer = Customer::from_contact(business_id, &new.contact, now);
                let id = customer.id;
                self.customers.insert(id, customer);
                id
            }
        }
    }
}

/// In-memory booking store for tests and single-process runs.
///
/// All state sits behind one lock so every operation is atomic, which is
/// what the PostgreSQL store gets from transactions and advisory locks.
#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a transient database error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn hold_count(&self) -> usize {
        self.state.read().await.holds.len()
    }

    pub async fn booking_count(&self) -> usize {
        self.state.read().await.bookings.len()
    }

    pub async fn processed_event_count(&self) -> usize {
        self.state.read().await.processed_events.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn put_inventory_item(&self, item: InventoryItem) -> Result<()> {
        self.check_available()?;
        self.state.write().await.items.insert(item.id, item);
        Ok(())
    }

    async fn list_inventory(&self, business_id: BusinessId) -> Result<Vec<InventoryItem>> {
        self.check_available()?;
        let mut items = self.state.read().await.inventory(business_id);
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn put_business_policy(
        &self,
        business_id: BusinessId,
        policy: BusinessPolicy,
    ) -> Result<()> {
        self.check_available()?;
        self.state.write().await.policies.insert(business_id, policy);
        Ok(())
    }

    async fn business_policy(&self, business_id: BusinessId) -> Result<Option<BusinessPolicy>> {
        self.check_available()?;
        Ok(self.state.read().await.policies.get(&business_id).cloned())
    }

    async fn put_coupon(&self, coupon: Coupon) -> Result<()> {
        self.check_available()?;
        self.state.write().await.coupons.insert(coupon.id, coupon);
        Ok(())
    }

    async fn find_coupon(&self, business_id: BusinessId, code: &str) -> Result<Option<Coupon>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .coupons
            .values()
            .find(|c| c.business_id == business_id && c.code.eq_ignore_ascii_case(code.trim()))
            .cloned())
    }

    async fn claims_overlapping(
        &self,
        business_id: BusinessId,
        range: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Claim>> {
        self.check_available()?;
        Ok(self.state.read().await.claims(business_id, range, now))
    }

    async fn create_hold(&self, hold: Hold, now: DateTime<Utc>) -> Result<Hold> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let policy = state.policy(hold.business_id);
        let items = state.inventory(hold.business_id);
        let range = claim_search_range(&hold.window, &policy);
        let claims = state.claims(hold.business_id, &range, now);
        ensure_capacity(&items, &claims, &hold.window, &hold.lines, &policy, now)?;

        state.holds.insert(hold.id, hold.clone());
        Ok(hold)
    }

    async fn get_hold(&self, hold_id: HoldId) -> Result<Option<Hold>> {
        self.check_available()?;
        Ok(self.state.read().await.holds.get(&hold_id).cloned())
    }

    async fn release_hold(&self, hold_id: HoldId) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.write().await.holds.remove(&hold_id).is_some())
    }

    async fn materialize_booking(
        &self,
        new: NewBooking,
        now: DateTime<Utc>,
    ) -> Result<Materialized> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let booking_id = BookingId::for_hold(new.hold_id);
        if let Some(existing) = state.bookings.get(&booking_id) {
            return Ok(Materialized::Existing(existing.clone()));
        }

        let hold = state
            .holds
            .get(&new.hold_id)
            .filter(|h| h.is_live(now))
            .cloned()
            .ok_or(StoreError::HoldExpired(new.hold_id))?;

        let customer_id = state.upsert_customer(hold.business_id, &new, now);
        let (booking, event) = Booking::from_hold(
            &hold,
            BookingDraft {
                customer_id,
                lines: new.lines,
                quote: new.quote,
                currency: new.currency,
                coupon_id: new.coupon_id,
                expires_at: new.expires_at,
            },
            now,
        );

        state.holds.remove(&hold.id);
        state.bookings.insert(booking.id, booking.clone());
        state.append(booking.id, event, now);

        Ok(Materialized::Created(booking))
    }

    async fn mark_payment_initiated(
        &self,
        booking_id: BookingId,
        attempt: PaymentAttempt,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let mut booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(booking_id))?;

        if booking.status == domain::BookingStatus::Pending
            && booking.payment_ref.as_deref() == Some(attempt.provider_payment_id.as_str())
        {
            return Ok(booking);
        }

        let event = booking.initiate_payment(attempt.provider_payment_id.clone(), expires_at, now)?;
        booking.apply(&event);

        state
            .payments
            .entry(attempt.provider_payment_id.clone())
            .or_insert_with(|| Payment {
                id: common::PaymentId::new(),
                booking_id,
                business_id: booking.business_id,
                provider_payment_id: attempt.provider_payment_id,
                amount: attempt.amount,
                currency: attempt.currency,
                status: PaymentStatus::Pending,
                created_at: now,
                updated_at: now,
            });
        state.bookings.insert(booking_id, booking.clone());
        state.append(booking_id, event, now);

        Ok(booking)
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        self.check_available()?;
        Ok(self.state.read().await.bookings.get(&booking_id).cloned())
    }

    async fn booking_events(&self, booking_id: BookingId) -> Result<Vec<BookingEventRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.events.get(&booking_id).cloned().unwrap_or_default())
    }

    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let mut booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(booking_id))?;
        let event = booking.cancel(reason, now)?;
        booking.apply(&event);

        state.bookings.insert(booking_id, booking.clone());
        state.append(booking_id, event, now);
        Ok(booking)
    }

    async fn payments_for_booking(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn find_payment(&self, provider_payment_id: &str) -> Result<Option<Payment>> {
        self.check_available()?;
        Ok(self.state.read().await.payments.get(provider_payment_id).cloned())
    }

    async fn apply_payment_event(
        &self,
        booking_id: BookingId,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(booking_id))?;

        if state.processed_events.contains_key(&event.event_id) {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let prior = state.payments.get(&event.payment_ref).cloned();
        let mut decision = booking.decide_payment(event, prior.as_ref(), now);
        if decision == (PaymentDecision::Confirm { revive: true }) {
            let policy = state.policy(booking.business_id);
            let items = state.inventory(booking.business_id);
            let range = claim_search_range(&booking.window, &policy);
            let claims = state.claims(booking.business_id, &range, now);
            if check_revival_capacity(&booking, &items, &claims, &policy, now).is_err() {
                decision = PaymentDecision::Record(domain::Ignored::CapacityLost);
            }
        }

        let previous_status = booking.status;
        let plan = plan_payment_event(booking, event, prior.as_ref(), decision, now)?;
        state
            .processed_events
            .insert(event.event_id.clone(), booking_id);

        let Some(plan) = plan else {
            return Ok(ReconcileOutcome::Duplicate);
        };
        let side_effects = plan.side_effects();

        match plan.ledger {
            LedgerWrite::Insert(payment) => {
                state
                    .payments
                    .entry(payment.provider_payment_id.clone())
                    .or_insert(payment);
            }
            LedgerWrite::Update(status) => {
                if let Some(payment) = state.payments.get_mut(&event.payment_ref) {
                    payment.status = status;
                    payment.updated_at = now;
                }
            }
            LedgerWrite::Skip => {}
        }

        let booking = plan.booking;
        for e in plan.events {
            state.append(booking_id, e, now);
        }

        if let Some(amount) = plan.confirmed_amount {
            if let Some(customer) = state.customers.get_mut(&booking.customer_id) {
                customer.record_confirmed_booking(amount, now);
            }
            if let Some(coupon) = booking.coupon_id.and_then(|id| state.coupons.get_mut(&id)) {
                coupon.times_used += 1;
                if coupon.max_uses.is_some_and(|max| coupon.times_used > max) {
                    tracing::warn!(
                        coupon_id = %coupon.id,
                        times_used = coupon.times_used,
                        "Coupon used past its limit"
                    );
                }
            }
            for kind in &side_effects {
                state.outbox.entry((booking_id, *kind)).or_insert(OutboxRow {
                    attempts: 0,
                    last_error: None,
                    created_at: now,
                    completed_at: None,
                });
            }
        }

        state.bookings.insert(booking_id, booking.clone());

        Ok(ReconcileOutcome::Applied(AppliedPaymentEvent {
            booking,
            previous_status,
            transition: plan.transition,
            side_effects,
        }))
    }

    async fn get_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>> {
        self.check_available()?;
        Ok(self.state.read().await.customers.get(&customer_id).cloned())
    }

    async fn find_customer(
        &self,
        business_id: BusinessId,
        email: &str,
    ) -> Result<Option<Customer>> {
        self.check_available()?;
        let email = email.trim().to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .customers
            .values()
            .find(|c| c.business_id == business_id && c.email == email)
            .cloned())
    }

    async fn upsert_waiver(&self, waiver: WaiverUpsert, now: DateTime<Utc>) -> Result<Waiver> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let key = (waiver.customer_id, waiver.business_id, waiver.booking_id);
        let stored = state
            .waivers
            .entry(key)
            .and_modify(|w| {
                w.document_id = waiver.document_id.clone();
                w.document_url = waiver.document_url.clone();
                w.updated_at = now;
            })
            .or_insert_with(|| Waiver {
                id: WaiverId::new(),
                business_id: waiver.business_id,
                customer_id: waiver.customer_id,
                booking_id: waiver.booking_id,
                document_id: waiver.document_id.clone(),
                document_url: waiver.document_url.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(stored.clone())
    }

    async fn find_waiver(&self, booking_id: BookingId) -> Result<Option<Waiver>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .waivers
            .values()
            .find(|w| w.booking_id == booking_id)
            .cloned())
    }

    async fn pending_side_effects(&self, limit: usize) -> Result<Vec<SideEffect>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut pending: Vec<SideEffect> = state
            .outbox
            .iter()
            .filter(|(_, row)| row.completed_at.is_none())
            .map(|((booking_id, kind), row)| SideEffect {
                booking_id: *booking_id,
                kind: *kind,
                attempts: row.attempts,
                last_error: row.last_error.clone(),
                created_at: row.created_at,
            })
            .collect();
        pending.sort_by_key(|s| s.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn complete_side_effect(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_available()?;
        if let Some(row) = self.state.write().await.outbox.get_mut(&(booking_id, kind)) {
            row.attempts += 1;
            row.completed_at.get_or_insert(now);
        }
        Ok(())
    }

    async fn record_side_effect_failure(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        error: &str,
    ) -> Result<()> {
        self.check_available()?;
        if let Some(row) = self.state.write().await.outbox.get_mut(&(booking_id, kind)) {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let before = state.holds.len();
        state.holds.retain(|_, hold| hold.is_live(now));
        let holds_deleted = (before - state.holds.len()) as u64;

        let lapsed: Vec<BookingId> = state
            .bookings
            .values()
            .filter(|b| b.status.can_expire() && b.expires_at.is_some_and(|at| at <= now))
            .map(|b| b.id)
            .collect();

        let mut expired_bookings = Vec::with_capacity(lapsed.len());
        for booking_id in lapsed {
            let Some(mut booking) = state.bookings.get(&booking_id).cloned() else {
                continue;
            };
            let event = booking.expire(ExpiryReason::TimedOut, now)?;
            booking.apply(&event);
            state.append(booking_id, event, now);
            state.bookings.insert(booking_id, booking.clone());
            expired_bookings.push(booking);
        }

        let mut payments_expired = 0;
        for payment in state.payments.values_mut() {
            if payment.status == PaymentStatus::Pending
                && expired_bookings.iter().any(|b| b.id == payment.booking_id)
            {
                payment.status = PaymentStatus::Expired;
                payment.updated_at = now;
                payments_expired += 1;
            }
        }

        Ok(ReapReport {
            holds_deleted,
            expired_bookings,
            payments_expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Transition;
    use chrono::{Duration, TimeZone};
    use domain::{
        BookingStatus, CustomerContact, Discount, Ignored, ItemQuantity, Money, PaymentOutcome,
        PriceLine, PriceQuote,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn window(start_h: u32, end_h: u32) -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 6, 1, start_h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, end_h, 0, 0).unwrap(),
        )
        .unwrap()
    }

    struct Fixture {
        store: InMemoryBookingStore,
        business_id: BusinessId,
        castle: InventoryItem,
    }

    async fn fixture(quantity: u32) -> Fixture {
        let store = InMemoryBookingStore::new();
        let business_id = BusinessId::new();
        let castle = InventoryItem::new(business_id, "Castle", quantity, Money::from_dollars(250));
        store.put_inventory_item(castle.clone()).await.unwrap();
        Fixture {
            store,
            business_id,
            castle,
        }
    }

    fn hold_for(f: &Fixture, window: TimeWindow, quantity: u32) -> Hold {
        Hold::new(
            f.business_id,
            vec![ItemQuantity::new(f.castle.id, quantity)],
            window,
            chrono_tz::Tz::UTC,
            now(),
            now() + Duration::minutes(15),
        )
    }

    fn new_booking(f: &Fixture, hold: &Hold, email: &str) -> NewBooking {
        let lines = vec![PriceLine {
            inventory_item_id: f.castle.id,
            name: f.castle.name.clone(),
            unit_price: f.castle.price,
            quantity: hold.lines[0].quantity,
        }];
        let quote = PriceQuote::compute(&lines, &BusinessPolicy::default(), None);
        NewBooking {
            hold_id: hold.id,
            contact: CustomerContact::new("Ana", email),
            lines,
            quote,
            currency: "usd".to_string(),
            coupon_id: None,
            expires_at: now() + Duration::minutes(15),
        }
    }

    async fn pending_booking(f: &Fixture, payment_ref: &str) -> Booking {
        let hold = f.store.create_hold(hold_for(f, window(14, 22), 1), now()).await.unwrap();
        let booking = f
            .store
            .materialize_booking(new_booking(f, &hold, "ana@example.com"), now())
            .await
            .unwrap()
            .into_booking();
        f.store
            .mark_payment_initiated(
                booking.id,
                PaymentAttempt {
                    provider_payment_id: payment_ref.to_string(),
                    amount: booking.pricing.amount_due,
                    currency: "usd".to_string(),
                },
                now() + Duration::hours(24),
                now(),
            )
            .await
            .unwrap()
    }

    fn payment_event(event_id: &str, payment_ref: &str, outcome: PaymentOutcome) -> PaymentEvent {
        PaymentEvent {
            event_id: event_id.to_string(),
            event_type: match outcome {
                PaymentOutcome::Succeeded => "payment_intent.succeeded",
                PaymentOutcome::Failed => "payment_intent.payment_failed",
            }
            .to_string(),
            payment_ref: payment_ref.to_string(),
            booking_ref: None,
            outcome: Some(outcome),
            amount: Some(Money::from_dollars(250)),
            currency: Some("usd".to_string()),
            occurred_at: now(),
        }
    }

    #[tokio::test]
    async fn test_create_hold_rejects_when_full() {
        let f = fixture(1).await;
        f.store.create_hold(hold_for(&f, window(14, 22), 1), now()).await.unwrap();

        let err = f
            .store
            .create_hold(hold_for(&f, window(16, 20), 1), now())
            .await
            .unwrap_err();
        match err {
            StoreError::Capacity(e) => {
                assert_eq!(e.shortfalls.len(), 1);
                assert_eq!(e.shortfalls[0].remaining, 0);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
        assert_eq!(f.store.hold_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_hold_frees_capacity_before_reaping() {
        let f = fixture(1).await;
        f.store.create_hold(hold_for(&f, window(14, 22), 1), now()).await.unwrap();

        let later = now() + Duration::minutes(16);
        assert!(f.store.create_hold(hold_for(&f, window(14, 22), 1), later).await.is_ok());
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent_per_hold() {
        let f = fixture(1).await;
        let hold = f.store.create_hold(hold_for(&f, window(14, 22), 1), now()).await.unwrap();

        let first = f
            .store
            .materialize_booking(new_booking(&f, &hold, "Ana@Example.com "), now())
            .await
            .unwrap();
        assert!(first.is_created());
        assert_eq!(first.booking().status, BookingStatus::Hold);
        assert_eq!(f.store.hold_count().await, 0);

        let second = f
            .store
            .materialize_booking(new_booking(&f, &hold, "ana@example.com"), now())
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.booking().id, first.booking().id);
        assert_eq!(f.store.booking_count().await, 1);

        let customer = f
            .store
            .find_customer(f.business_id, "ANA@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(customer.email, "ana@example.com");
    }

    #[tokio::test]
    async fn test_materialize_expired_hold_fails() {
        let f = fixture(1).await;
        let hold = f.store.create_hold(hold_for(&f, window(14, 22), 1), now()).await.unwrap();
        let late = now() + Duration::minutes(15);

        let err = f
            .store
            .materialize_booking(new_booking(&f, &hold, "ana@example.com"), late)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::HoldExpired(id) if id == hold.id));
    }

    #[tokio::test]
    async fn test_payment_initiation_is_idempotent_for_same_attempt() {
        let f = fixture(1).await;
        let booking = pending_booking(&f, "pi_1").await;
        assert_eq!(booking.status, BookingStatus::Pending);

        let again = f
            .store
            .mark_payment_initiated(
                booking.id,
                PaymentAttempt {
                    provider_payment_id: "pi_1".to_string(),
                    amount: booking.pricing.amount_due,
                    currency: "usd".to_string(),
                },
                now() + Duration::hours(24),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(again, booking);
        assert_eq!(f.store.booking_events(booking.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_success_confirms_once_and_enqueues_side_effects() {
        let f = fixture(1).await;
        let booking = pending_booking(&f, "pi_1").await;
        let success = payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded);

        let outcome = f.store.apply_payment_event(booking.id, &success, now()).await.unwrap();
        let ReconcileOutcome::Applied(applied) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(applied.transition, Transition::Confirmed { revived: false });
        assert_eq!(applied.previous_status, BookingStatus::Pending);
        assert_eq!(applied.side_effects.len(), 2);

        let replay = f.store.apply_payment_event(booking.id, &success, now()).await.unwrap();
        assert_eq!(replay, ReconcileOutcome::Duplicate);

        let payments = f.store.payments_for_booking(booking.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Completed);

        let customer = f.store.get_customer(booking.customer_id).await.unwrap().unwrap();
        assert_eq!(customer.booking_count, 1);
        assert_eq!(customer.total_spent, Money::from_dollars(250));

        assert_eq!(f.store.pending_side_effects(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_downgrade_confirmed() {
        let f = fixture(1).await;
        let booking = pending_booking(&f, "pi_1").await;
        f.store
            .apply_payment_event(booking.id, &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded), now())
            .await
            .unwrap();

        let outcome = f
            .store
            .apply_payment_event(booking.id, &payment_event("evt_0", "pi_0", PaymentOutcome::Failed), now())
            .await
            .unwrap();
        let ReconcileOutcome::Applied(applied) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(applied.transition, Transition::Unchanged(Ignored::AlreadyConfirmed));
        assert_eq!(applied.booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_unknown_booking_records_nothing() {
        let f = fixture(1).await;
        let err = f
            .store
            .apply_payment_event(
                BookingId::new(),
                &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded),
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BookingNotFound(_)));
        assert_eq!(f.store.processed_event_count().await, 0);
    }

    #[tokio::test]
    async fn test_revival_requires_capacity() {
        let f = fixture(1).await;
        let booking = pending_booking(&f, "pi_1").await;

        // the booking lapses and someone else takes the unit
        let later = now() + Duration::hours(25);
        let report = f.store.reap_expired(later).await.unwrap();
        assert_eq!(report.expired_bookings.len(), 1);
        assert_eq!(report.payments_expired, 1);
        let mut other = hold_for(&f, window(14, 22), 1);
        other.expires_at = later + Duration::minutes(15);
        f.store.create_hold(other, later).await.unwrap();

        let outcome = f
            .store
            .apply_payment_event(booking.id, &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded), later)
            .await
            .unwrap();
        let ReconcileOutcome::Applied(applied) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(applied.transition, Transition::Unchanged(Ignored::CapacityLost));
        assert_eq!(applied.booking.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn test_revival_with_free_capacity_confirms() {
        let f = fixture(1).await;
        let booking = pending_booking(&f, "pi_1").await;
        let later = now() + Duration::hours(25);

        let outcome = f
            .store
            .apply_payment_event(booking.id, &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded), later)
            .await
            .unwrap();
        let ReconcileOutcome::Applied(applied) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(applied.transition, Transition::Confirmed { revived: true });
        assert_eq!(applied.booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_confirmation_counts_coupon_use() {
        let f = fixture(1).await;
        let coupon = Coupon::new(f.business_id, "SPRING10", Discount::Percent { percent: 10 });
        f.store.put_coupon(coupon.clone()).await.unwrap();

        let hold = f.store.create_hold(hold_for(&f, window(14, 22), 1), now()).await.unwrap();
        let mut new = new_booking(&f, &hold, "ana@example.com");
        new.coupon_id = Some(coupon.id);
        let booking = f.store.materialize_booking(new, now()).await.unwrap().into_booking();

        f.store
            .apply_payment_event(booking.id, &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded), now())
            .await
            .unwrap();
        f.store
            .apply_payment_event(booking.id, &payment_event("evt_1", "pi_1", PaymentOutcome::Succeeded), now())
            .await
            .unwrap();

        let stored = f.store.find_coupon(f.business_id, "spring10").await.unwrap().unwrap();
        assert_eq!(stored.times_used, 1);
    }

    #[tokio::test]
    async fn test_waiver_upsert_replaces_document() {
        let store = InMemoryBookingStore::new();
        let upsert = |doc: &str| WaiverUpsert {
            business_id: BusinessId::from_uuid(uuid::Uuid::nil()),
            customer_id: CustomerId::from_uuid(uuid::Uuid::nil()),
            booking_id: BookingId::from_uuid(uuid::Uuid::nil()),
            document_id: doc.to_string(),
            document_url: format!("https://waivers.example.com/{doc}"),
        };
        let first = store.upsert_waiver(upsert("doc_1"), now()).await.unwrap();
        let second = store.upsert_waiver(upsert("doc_2"), now()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.document_id, "doc_2");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_transiently() {
        let store = InMemoryBookingStore::new();
        store.set_unavailable(true);
        let err = store.get_booking(BookingId::new()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
