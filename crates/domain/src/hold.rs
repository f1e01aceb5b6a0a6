//! Short-lived checkout holds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::{BusinessId, HoldId, InventoryItemId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::availability::{Claim, ClaimSource, ItemQuantity};
use crate::window::TimeWindow;

/// Invalid hold request contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoldRequestError {
    #[error("a hold needs at least one item")]
    NoItems,

    #[error("invalid quantity {quantity} for item {inventory_item_id}")]
    InvalidQuantity {
        inventory_item_id: InventoryItemId,
        quantity: u32,
    },
}

/// Validates requested lines and merges duplicate items.
///
/// The result is ordered by item id, which is also the lock order used when
/// granting the hold.
pub fn normalize_lines(lines: &[ItemQuantity]) -> Result<Vec<ItemQuantity>, HoldRequestError> {
    if lines.is_empty() {
        return Err(HoldRequestError::NoItems);
    }

    let mut merged: BTreeMap<InventoryItemId, u32> = BTreeMap::new();
    for line in lines {
        let invalid = HoldRequestError::InvalidQuantity {
            inventory_item_id: line.inventory_item_id,
            quantity: line.quantity,
        };
        if line.quantity == 0 {
            return Err(invalid);
        }
        let total = merged.entry(line.inventory_item_id).or_default();
        *total = total.checked_add(line.quantity).ok_or(invalid)?;
    }

    Ok(merged
        .into_iter()
        .map(|(inventory_item_id, quantity)| ItemQuantity::new(inventory_item_id, quantity))
        .collect())
}

/// An exclusive, time-limited claim on item quantities for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: HoldId,
    pub business_id: BusinessId,
    pub lines: Vec<ItemQuantity>,
    pub window: TimeWindow,
    pub timezone: Tz,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Builds a new hold. `lines` are expected to be normalized.
    pub fn new(
        business_id: BusinessId,
        lines: Vec<ItemQuantity>,
        window: TimeWindow,
        timezone: Tz,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HoldId::new(),
            business_id,
            lines,
            window,
            timezone,
            created_at,
            expires_at,
        }
    }

    /// A hold past `expires_at` is treated as non-existent.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn claims(&self) -> impl Iterator<Item = Claim> + '_ {
        self.lines.iter().map(move |line| Claim {
            source: ClaimSource::Hold(self.id),
            inventory_item_id: line.inventory_item_id,
            quantity: line.quantity,
            window: self.window,
            expires_at: Some(self.expires_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_merges_duplicates() {
        let a = InventoryItemId::new();
        let b = InventoryItemId::new();
        let lines = normalize_lines(&[
            ItemQuantity::new(a, 1),
            ItemQuantity::new(b, 2),
            ItemQuantity::new(a, 3),
        ])
        .unwrap();

        assert_eq!(lines.len(), 2);
        let merged_a = lines.iter().find(|l| l.inventory_item_id == a).unwrap();
        assert_eq!(merged_a.quantity, 4);
        assert!(lines.windows(2).all(|w| w[0].inventory_item_id < w[1].inventory_item_id));
    }

    #[test]
    fn normalize_rejects_empty_and_zero() {
        assert_eq!(normalize_lines(&[]), Err(HoldRequestError::NoItems));
        let id = InventoryItemId::new();
        assert!(matches!(
            normalize_lines(&[ItemQuantity::new(id, 0)]),
            Err(HoldRequestError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn normalize_rejects_merged_quantity_overflow() {
        let id = InventoryItemId::new();
        let result = normalize_lines(&[ItemQuantity::new(id, u32::MAX), ItemQuantity::new(id, 1)]);
        assert_eq!(
            result,
            Err(HoldRequestError::InvalidQuantity {
                inventory_item_id: id,
                quantity: 1,
            })
        );
    }
}
