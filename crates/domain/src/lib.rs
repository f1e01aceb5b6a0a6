//! Domain layer for the rental booking engine.
//!
//! This crate is pure: no I/O, no clocks. Every function that depends on
//! the current time takes `now` as an argument.
//!
//! - [`window`]: local rental windows, UTC time windows, half-open overlap
//! - [`policy`]: per-business buffers, notice window, tax and deposit rules
//! - [`availability`]: capacity arithmetic over holds and bookings
//! - [`pricing`]: server-side price quotes and coupon rules
//! - [`booking`]: the booking aggregate, its state machine and payment decisions

pub mod aggregate;
pub mod availability;
pub mod booking;
pub mod customer;
pub mod error;
pub mod hold;
pub mod inventory;
pub mod money;
pub mod payment;
pub mod policy;
pub mod pricing;
pub mod waiver;
pub mod window;

pub use aggregate::{Aggregate, DomainEvent};
pub use availability::{
    CapacityError, Claim, ClaimSource, ItemAvailability, ItemQuantity, Shortfall,
    claim_search_range, ensure_capacity, resolve_availability,
};
pub use booking::{
    Booking, BookingDraft, BookingEvent, BookingItem, BookingStatus, ExpiryReason, Ignored,
    PaymentDecision, TransitionError,
};
pub use customer::{Address, ContactError, Customer, CustomerContact};
pub use error::DomainError;
pub use hold::{Hold, HoldRequestError, normalize_lines};
pub use inventory::{InventoryItem, UnitMetadata};
pub use money::Money;
pub use payment::{Payment, PaymentEvent, PaymentOutcome, PaymentStatus};
pub use policy::{BusinessPolicy, NoticeViolation};
pub use pricing::{
    Coupon, CouponRejection, Discount, PriceField, PriceLine, PriceMismatch, PriceQuote,
    SubmittedPricing,
};
pub use waiver::Waiver;
pub use window::{RentalWindow, TimeWindow, WindowError};
