//! Liability waivers issued for confirmed bookings.

use chrono::{DateTime, Utc};
use common::{BookingId, BusinessId, CustomerId, WaiverId};
use serde::{Deserialize, Serialize};

/// One waiver per (customer, business, booking). Re-issuing replaces the
/// document reference instead of adding a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    pub id: WaiverId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub booking_id: BookingId,
    pub document_id: String,
    pub document_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
