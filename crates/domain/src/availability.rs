//! Capacity arithmetic over live holds and bookings.
//!
//! A *claim* is one (item, quantity, window) triple held by either a hold or
//! a booking. A claim blocks a requested window when the claim's window,
//! grown by the business's pre- and post-buffers, intersects the requested
//! window. Remaining quantity is total quantity minus the sum of blocking
//! claims.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{BookingId, HoldId, InventoryItemId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inventory::InventoryItem;
use crate::money::Money;
use crate::policy::BusinessPolicy;
use crate::window::TimeWindow;

/// What owns a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ClaimSource {
    Hold(HoldId),
    Booking(BookingId),
}

/// Quantity of one item requested or claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub inventory_item_id: InventoryItemId,
    pub quantity: u32,
}

impl ItemQuantity {
    pub fn new(inventory_item_id: InventoryItemId, quantity: u32) -> Self {
        Self {
            inventory_item_id,
            quantity,
        }
    }
}

/// A capacity claim held by a hold or booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub source: ClaimSource,
    pub inventory_item_id: InventoryItemId,
    pub quantity: u32,
    pub window: TimeWindow,
    /// `None` for confirmed bookings, which never lapse.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Claim {
    /// A claim past its expiry no longer holds capacity, reaped or not.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    /// Returns true if this claim, with buffers applied, covers any instant
    /// of `requested`.
    pub fn blocks(&self, requested: &TimeWindow, policy: &BusinessPolicy) -> bool {
        self.window
            .expand(policy.buffer_before(), policy.buffer_after())
            .overlaps(requested)
    }
}

/// The raw-window range a store must scan to find every claim that could
/// block `requested`.
///
/// Growing a claim by (before, after) and testing overlap is the same as
/// growing the request by (after, before), so claims whose stored window
/// intersects this range are a superset of the blocking ones.
pub fn claim_search_range(requested: &TimeWindow, policy: &BusinessPolicy) -> TimeWindow {
    requested.expand(policy.buffer_after(), policy.buffer_before())
}

/// Bookable quantity of one item for a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAvailability {
    pub inventory_item_id: InventoryItemId,
    pub name: String,
    pub price: Money,
    pub total_quantity: u32,
    pub remaining_quantity: u32,
}

/// One item a hold could not be granted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub inventory_item_id: InventoryItemId,
    pub requested: u32,
    pub remaining: u32,
}

/// Not every requested quantity is available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient availability for {} item(s)", shortfalls.len())]
pub struct CapacityError {
    pub shortfalls: Vec<Shortfall>,
}

fn claimed_by_item(
    claims: &[Claim],
    requested: &TimeWindow,
    policy: &BusinessPolicy,
    now: DateTime<Utc>,
) -> HashMap<InventoryItemId, u32> {
    let mut claimed: HashMap<InventoryItemId, u32> = HashMap::new();
    for claim in claims
        .iter()
        .filter(|c| c.is_live(now) && c.blocks(requested, policy))
    {
        *claimed.entry(claim.inventory_item_id).or_default() += claim.quantity;
    }
    claimed
}

/// Computes remaining quantity per item for `requested`.
///
/// Items with nothing left are omitted; the rest are sorted by name.
pub fn resolve_availability(
    items: &[InventoryItem],
    claims: &[Claim],
    requested: &TimeWindow,
    policy: &BusinessPolicy,
    now: DateTime<Utc>,
) -> Vec<ItemAvailability> {
    let claimed = claimed_by_item(claims, requested, policy, now);

    let mut available: Vec<ItemAvailability> = items
        .iter()
        .filter_map(|item| {
            let used = claimed.get(&item.id).copied().unwrap_or(0);
            let remaining = item.total_quantity.saturating_sub(used);
            (remaining > 0).then(|| ItemAvailability {
                inventory_item_id: item.id,
                name: item.name.clone(),
                price: item.price,
                total_quantity: item.total_quantity,
                remaining_quantity: remaining,
            })
        })
        .collect();

    available.sort_by(|a, b| a.name.cmp(&b.name));
    available
}

/// Checks that every requested quantity fits.
///
/// Every offending item is reported, including items that are unknown to
/// the business (remaining 0). Nothing is partially granted.
pub fn ensure_capacity(
    items: &[InventoryItem],
    claims: &[Claim],
    requested: &TimeWindow,
    wanted: &[ItemQuantity],
    policy: &BusinessPolicy,
    now: DateTime<Utc>,
) -> Result<(), CapacityError> {
    let claimed = claimed_by_item(claims, requested, policy, now);

    let shortfalls: Vec<Shortfall> = wanted
        .iter()
        .filter_map(|want| {
            let remaining = items
                .iter()
                .find(|item| item.id == want.inventory_item_id)
                .map(|item| {
                    let used = claimed.get(&item.id).copied().unwrap_or(0);
                    item.total_quantity.saturating_sub(used)
                })
                .unwrap_or(0);
            (want.quantity > remaining).then_some(Shortfall {
                inventory_item_id: want.inventory_item_id,
                requested: want.quantity,
                remaining,
            })
        })
        .collect();

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(CapacityError { shortfalls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::BusinessId;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn window(sh: u32, sm: u32, eh: u32, em: u32) -> TimeWindow {
        TimeWindow::new(at(sh, sm), at(eh, em)).unwrap()
    }

    fn item(quantity: u32) -> InventoryItem {
        InventoryItem::new(BusinessId::new(), "Castle Bounce House", quantity, Money::from_dollars(250))
    }

    fn booking_claim(item: &InventoryItem, quantity: u32, window: TimeWindow) -> Claim {
        Claim {
            source: ClaimSource::Booking(BookingId::new()),
            inventory_item_id: item.id,
            quantity,
            window,
            expires_at: None,
        }
    }

    #[test]
    fn buffers_block_nearby_windows() {
        let policy = BusinessPolicy::default().with_buffer_hours(2, 2);
        let castle = item(1);
        let claims = vec![booking_claim(&castle, 1, window(10, 0, 14, 0))];

        let blocked = resolve_availability(
            std::slice::from_ref(&castle),
            &claims,
            &window(15, 30, 18, 0),
            &policy,
            now(),
        );
        assert!(blocked.is_empty());

        let free = resolve_availability(
            std::slice::from_ref(&castle),
            &claims,
            &window(16, 1, 18, 0),
            &policy,
            now(),
        );
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].remaining_quantity, 1);
    }

    #[test]
    fn pre_buffer_blocks_before_start() {
        let policy = BusinessPolicy::default().with_buffer_hours(2, 0);
        let castle = item(1);
        let claims = vec![booking_claim(&castle, 1, window(10, 0, 14, 0))];

        let before = window(7, 0, 8, 30);
        assert!(resolve_availability(std::slice::from_ref(&castle), &claims, &before, &policy, now()).is_empty());

        let earlier = window(6, 0, 8, 0);
        assert_eq!(
            resolve_availability(std::slice::from_ref(&castle), &claims, &earlier, &policy, now()).len(),
            1
        );
    }

    #[test]
    fn zero_buffer_allows_back_to_back() {
        let policy = BusinessPolicy::default();
        let castle = item(1);
        let claims = vec![booking_claim(&castle, 1, window(10, 0, 14, 0))];

        let after = window(14, 0, 18, 0);
        assert_eq!(resolve_availability(std::slice::from_ref(&castle), &claims, &after, &policy, now()).len(), 1);

        let touching_start = window(13, 59, 18, 0);
        assert!(resolve_availability(std::slice::from_ref(&castle), &claims, &touching_start, &policy, now()).is_empty());
    }

    #[test]
    fn zero_buffer_blocks_delivery_instant() {
        let policy = BusinessPolicy::default();
        let castle = item(1);
        let claims = vec![booking_claim(&castle, 1, window(10, 0, 14, 0))];
        let remaining = |requested: TimeWindow| {
            resolve_availability(std::slice::from_ref(&castle), &claims, &requested, &policy, now())
        };

        assert!(remaining(window(10, 0, 10, 1)).is_empty());
        assert!(remaining(window(13, 59, 14, 0)).is_empty());
        assert_eq!(remaining(window(9, 0, 10, 0)).len(), 1);
        assert_eq!(remaining(window(14, 0, 14, 1)).len(), 1);
    }

    #[test]
    fn expired_claims_are_ignored() {
        let policy = BusinessPolicy::default();
        let castle = item(1);
        let claims = vec![Claim {
            source: ClaimSource::Hold(HoldId::new()),
            inventory_item_id: castle.id,
            quantity: 1,
            window: window(10, 0, 14, 0),
            expires_at: Some(now() - Duration::seconds(1)),
        }];

        let result = resolve_availability(std::slice::from_ref(&castle), &claims, &window(10, 0, 14, 0), &policy, now());
        assert_eq!(result[0].remaining_quantity, 1);
    }

    #[test]
    fn overlapping_claims_are_summed() {
        let policy = BusinessPolicy::default();
        let tables = item(10);
        let claims = vec![
            booking_claim(&tables, 4, window(9, 0, 11, 0)),
            booking_claim(&tables, 3, window(12, 0, 15, 0)),
            booking_claim(&tables, 5, window(16, 0, 18, 0)),
        ];

        let result = resolve_availability(std::slice::from_ref(&tables), &claims, &window(10, 0, 13, 0), &policy, now());
        assert_eq!(result[0].remaining_quantity, 3);
    }

    #[test]
    fn ensure_capacity_names_every_offending_item() {
        let policy = BusinessPolicy::default();
        let castle = item(1);
        let tables = item(2);
        let unknown = InventoryItemId::new();
        let requested = window(10, 0, 14, 0);
        let claims = vec![booking_claim(&castle, 1, requested)];

        let err = ensure_capacity(
            &[castle.clone(), tables.clone()],
            &claims,
            &requested,
            &[
                ItemQuantity::new(castle.id, 1),
                ItemQuantity::new(tables.id, 2),
                ItemQuantity::new(unknown, 1),
            ],
            &policy,
            now(),
        )
        .unwrap_err();

        assert_eq!(err.shortfalls.len(), 2);
        assert_eq!(err.shortfalls[0].inventory_item_id, castle.id);
        assert_eq!(err.shortfalls[0].remaining, 0);
        assert_eq!(err.shortfalls[1].inventory_item_id, unknown);
    }

    #[test]
    fn search_range_swaps_buffers() {
        let policy = BusinessPolicy::default().with_buffer_hours(1, 3);
        let range = claim_search_range(&window(10, 0, 12, 0), &policy);
        assert_eq!(range.start(), at(7, 0));
        assert_eq!(range.end(), at(13, 0));
    }
}
