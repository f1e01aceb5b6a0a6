//! Booking aggregate and its lifecycle.

mod aggregate;
mod decision;
mod events;
mod status;

pub use aggregate::{Booking, BookingDraft, BookingItem};
pub use decision::{Ignored, PaymentDecision};
pub use events::{
    BookingCancelledData, BookingConfirmedData, BookingCreatedData, BookingEvent,
    BookingExpiredData, ExpiryReason, PaymentInitiatedData,
};
pub use status::BookingStatus;

use thiserror::Error;

/// A state-machine transition that is not allowed from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid state transition: cannot {action} from {from} status")]
pub struct TransitionError {
    pub from: BookingStatus,
    pub action: &'static str,
}
