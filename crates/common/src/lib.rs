//! Shared types for the booking engine crates.

mod types;

pub use types::{
    BookingId, BusinessId, CouponId, CustomerId, HoldId, InventoryItemId, PaymentId, WaiverId,
};
