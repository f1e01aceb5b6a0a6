//! Inventory items as seen by the booking core (read-only).

use common::{BusinessId, InventoryItemId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Physical attributes shown to customers; not used in capacity math.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// Maximum occupants or guests, when relevant.
    pub capacity: Option<u32>,
    pub dimensions: Option<String>,
}

/// A rentable item. One row may represent several identical units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryItemId,
    pub business_id: BusinessId,
    pub name: String,
    pub total_quantity: u32,
    /// Price per unit for one rental window.
    pub price: Money,
    #[serde(default)]
    pub metadata: UnitMetadata,
}

impl InventoryItem {
    pub fn new(
        business_id: BusinessId,
        name: impl Into<String>,
        total_quantity: u32,
        price: Money,
    ) -> Self {
        Self {
            id: InventoryItemId::new(),
            business_id,
            name: name.into(),
            total_quantity,
            price,
            metadata: UnitMetadata::default(),
        }
    }
}
