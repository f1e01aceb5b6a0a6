//! Checkout holds.

use std::sync::Arc;

use chrono::Duration;
use common::{BusinessId, HoldId};
use domain::{DomainError, Hold, ItemQuantity, RentalWindow, normalize_lines};
use store::{BookingStore, StoreError};

use crate::clock::Clock;
use crate::error::Result;
use crate::resolver::policy_for;

/// Grants and releases short-lived exclusive claims on inventory.
pub struct HoldLedger<S> {
    store: S,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

impl<S: BookingStore + Clone> HoldLedger<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, hold_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            hold_ttl,
        }
    }

    /// Places a hold on every requested line, or on none of them.
    ///
    /// Capacity is re-checked by the store under per-item locks, so two
    /// concurrent calls can never both take the last unit.
    #[tracing::instrument(skip(self, window, items), fields(lines = items.len()))]
    pub async fn create_hold(
        &self,
        business_id: BusinessId,
        window: &RentalWindow,
        items: &[ItemQuantity],
    ) -> Result<Hold> {
        let now = self.clock.now();

        let lines = normalize_lines(items).map_err(DomainError::from)?;
        let requested = window.to_utc().map_err(DomainError::from)?;
        let policy = policy_for(&self.store, business_id).await?;
        policy
            .check_notice(requested.start(), now)
            .map_err(DomainError::from)?;

        let hold = Hold::new(
            business_id,
            lines,
            requested,
            window.timezone,
            now,
            now + self.hold_ttl,
        );

        match self.store.create_hold(hold, now).await {
            Ok(hold) => {
                metrics::counter!("holds_created_total").increment(1);
                tracing::info!(hold_id = %hold.id, expires_at = %hold.expires_at, "hold granted");
                Ok(hold)
            }
            Err(StoreError::Capacity(err)) => {
                metrics::counter!("holds_rejected_total").increment(1);
                tracing::info!(shortfalls = err.shortfalls.len(), "hold rejected");
                Err(StoreError::Capacity(err).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes a hold. Releasing a missing or consumed hold is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn release_hold(&self, hold_id: HoldId) -> Result<bool> {
        let removed = self.store.release_hold(hold_id).await?;
        if removed {
            metrics::counter!("holds_released_total").increment(1);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::EngineError;
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
    use common::InventoryItemId;
    use domain::{InventoryItem, Money};
    use store::InMemoryBookingStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn saturday() -> RentalWindow {
        RentalWindow::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            chrono_tz::America::Chicago,
        )
    }

    async fn setup(quantity: u32) -> (FixedClock, InventoryItem, HoldLedger<InMemoryBookingStore>) {
        let store = InMemoryBookingStore::new();
        let item = InventoryItem::new(BusinessId::new(), "Castle Bounce House", quantity, Money::from_dollars(250));
        store.put_inventory_item(item.clone()).await.unwrap();
        let clock = FixedClock::new(now());
        let ledger = HoldLedger::new(store, Arc::new(clock.clone()), Duration::minutes(15));
        (clock, item, ledger)
    }

    #[tokio::test]
    async fn hold_expires_after_ttl() {
        let (_clock, item, ledger) = setup(1).await;
        let hold = ledger
            .create_hold(item.business_id, &saturday(), &[ItemQuantity::new(item.id, 1)])
            .await
            .unwrap();
        assert_eq!(hold.expires_at, now() + Duration::minutes(15));
        assert_eq!(hold.timezone, chrono_tz::America::Chicago);
    }

    #[tokio::test]
    async fn duplicate_lines_are_merged_before_checking() {
        let (_clock, item, ledger) = setup(1).await;
        let err = ledger
            .create_hold(
                item.business_id,
                &saturday(),
                &[ItemQuantity::new(item.id, 1), ItemQuantity::new(item.id, 1)],
            )
            .await
            .unwrap_err();
        match err {
            EngineError::InsufficientAvailability { shortfalls } => {
                assert_eq!(shortfalls[0].requested, 2);
                assert_eq!(shortfalls[0].remaining, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_items_are_reported_with_nothing_remaining() {
        let (_clock, item, ledger) = setup(1).await;
        let stranger = InventoryItemId::new();
        let err = ledger
            .create_hold(
                item.business_id,
                &saturday(),
                &[ItemQuantity::new(item.id, 1), ItemQuantity::new(stranger, 1)],
            )
            .await
            .unwrap_err();
        let EngineError::InsufficientAvailability { shortfalls } = err else {
            panic!("expected insufficient availability");
        };
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].inventory_item_id, stranger);
        assert_eq!(shortfalls[0].remaining, 0);
    }

    #[tokio::test]
    async fn empty_request_is_invalid() {
        let (_clock, item, ledger) = setup(1).await;
        let err = ledger.create_hold(item.business_id, &saturday(), &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn lapsed_hold_frees_the_unit() {
        let (clock, item, ledger) = setup(1).await;
        let lines = [ItemQuantity::new(item.id, 1)];
        ledger.create_hold(item.business_id, &saturday(), &lines).await.unwrap();

        clock.advance(Duration::minutes(15));
        assert!(ledger.create_hold(item.business_id, &saturday(), &lines).await.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (_clock, item, ledger) = setup(1).await;
        let lines = [ItemQuantity::new(item.id, 1)];
        let hold = ledger.create_hold(item.business_id, &saturday(), &lines).await.unwrap();

        assert!(ledger.release_hold(hold.id).await.unwrap());
        assert!(!ledger.release_hold(hold.id).await.unwrap());
        assert!(ledger.create_hold(item.business_id, &saturday(), &lines).await.is_ok());
    }
}
