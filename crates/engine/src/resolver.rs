//! Availability search.

use std::sync::Arc;

use common::BusinessId;
use domain::{
    BusinessPolicy, DomainError, ItemAvailability, RentalWindow, claim_search_range,
    resolve_availability,
};
use store::BookingStore;

use crate::clock::Clock;
use crate::error::Result;

/// Loads a business's policy, falling back to the defaults when none is
/// configured.
pub(crate) async fn policy_for<S: BookingStore>(
    store: &S,
    business_id: BusinessId,
) -> Result<BusinessPolicy> {
    let policy = store.business_policy(business_id).await?;
    if policy.is_none() {
        tracing::debug!(%business_id, "no business policy configured, using defaults");
    }
    Ok(policy.unwrap_or_default())
}

/// Answers "what can still be booked for this window".
///
/// Read-only: the answer may be stale by the time a hold is requested, which
/// is why the hold ledger re-checks under lock.
pub struct AvailabilityResolver<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: BookingStore + Clone> AvailabilityResolver<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Remaining quantity per item for the window, sorted by item name.
    ///
    /// Items with nothing left are omitted. The notice window is enforced
    /// before anything is read.
    #[tracing::instrument(skip(self, window), fields(date = %window.date))]
    pub async fn search(
        &self,
        business_id: BusinessId,
        window: &RentalWindow,
    ) -> Result<Vec<ItemAvailability>> {
        metrics::counter!("availability_searches_total").increment(1);
        let now = self.clock.now();

        let requested = window.to_utc().map_err(DomainError::from)?;
        let policy = policy_for(&self.store, business_id).await?;
        policy
            .check_notice(requested.start(), now)
            .map_err(DomainError::from)?;

        let items = self.store.list_inventory(business_id).await?;
        let range = claim_search_range(&requested, &policy);
        let claims = self
            .store
            .claims_overlapping(business_id, &range, now)
            .await?;

        let available = resolve_availability(&items, &claims, &requested, &policy, now);
        tracing::debug!(
            items = items.len(),
            claims = claims.len(),
            available = available.len(),
            "availability resolved"
        );
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::EngineError;
    use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
    use domain::{Hold, InventoryItem, ItemQuantity, Money, NoticeViolation};
    use store::InMemoryBookingStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> RentalWindow {
        RentalWindow::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            chrono_tz::America::Chicago,
        )
    }

    async fn setup(policy: BusinessPolicy) -> (InMemoryBookingStore, InventoryItem, AvailabilityResolver<InMemoryBookingStore>) {
        let store = InMemoryBookingStore::new();
        let business_id = BusinessId::new();
        let castle = InventoryItem::new(business_id, "Castle Bounce House", 1, Money::from_dollars(250));
        store.put_inventory_item(castle.clone()).await.unwrap();
        store.put_business_policy(business_id, policy).await.unwrap();
        let resolver = AvailabilityResolver::new(store.clone(), Arc::new(FixedClock::new(now())));
        (store, castle, resolver)
    }

    async fn claim(store: &InMemoryBookingStore, item: &InventoryItem, window: &RentalWindow) {
        let hold = Hold::new(
            item.business_id,
            vec![ItemQuantity::new(item.id, 1)],
            window.to_utc().unwrap(),
            window.timezone,
            now(),
            now() + Duration::minutes(15),
        );
        store.create_hold(hold, now()).await.unwrap();
    }

    #[tokio::test]
    async fn post_buffer_blocks_until_it_elapses() {
        let (store, castle, resolver) = setup(BusinessPolicy::default().with_buffer_hours(2, 2)).await;
        claim(&store, &castle, &window((10, 0), (14, 0))).await;

        let blocked = resolver.search(castle.business_id, &window((15, 30), (18, 0))).await.unwrap();
        assert!(blocked.is_empty());

        let open = resolver.search(castle.business_id, &window((16, 1), (18, 0))).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].remaining_quantity, 1);
    }

    #[tokio::test]
    async fn back_to_back_windows_do_not_conflict() {
        let (store, castle, resolver) = setup(BusinessPolicy::default()).await;
        claim(&store, &castle, &window((9, 0), (13, 0))).await;

        let after = resolver.search(castle.business_id, &window((13, 0), (17, 0))).await.unwrap();
        assert_eq!(after.len(), 1);

        let overlapping = resolver.search(castle.business_id, &window((12, 59), (17, 0))).await.unwrap();
        assert!(overlapping.is_empty());
    }

    #[tokio::test]
    async fn search_too_soon_is_rejected() {
        let (_store, castle, resolver) = setup(BusinessPolicy::default().with_notice_hours(24 * 45, 24 * 90)).await;

        let err = resolver.search(castle.business_id, &window((9, 0), (17, 0))).await.unwrap_err();
        assert!(matches!(err, EngineError::NoticeViolation(NoticeViolation::TooSoon { .. })));
    }

    #[tokio::test]
    async fn inverted_window_is_invalid() {
        let (_store, castle, resolver) = setup(BusinessPolicy::default()).await;

        let err = resolver.search(castle.business_id, &window((17, 0), (9, 0))).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidWindow(_)));
    }

    #[tokio::test]
    async fn missing_policy_uses_defaults() {
        let store = InMemoryBookingStore::new();
        let business_id = BusinessId::new();
        store
            .put_inventory_item(InventoryItem::new(business_id, "Folding Table", 10, Money::from_dollars(12)))
            .await
            .unwrap();
        let resolver = AvailabilityResolver::new(store, Arc::new(FixedClock::new(now())));

        let found = resolver.search(business_id, &window((9, 0), (17, 0))).await.unwrap();
        assert_eq!(found[0].remaining_quantity, 10);
    }
}
