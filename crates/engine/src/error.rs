//! Engine error types.

use common::{BookingId, HoldId};
use domain::{
    CouponRejection, DomainError, NoticeViolation, PriceMismatch, Shortfall, TransitionError,
    WindowError,
};
use store::StoreError;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more requested items do not fit the window.
    #[error("Insufficient availability for {} item(s)", shortfalls.len())]
    InsufficientAvailability { shortfalls: Vec<Shortfall> },

    /// The hold was never granted, already consumed, or has lapsed.
    #[error("Hold not found or expired: {0}")]
    HoldExpired(HoldId),

    #[error(transparent)]
    PriceMismatch(PriceMismatch),

    #[error("Coupon '{code}' rejected: {reason}")]
    CouponRejected {
        code: String,
        reason: CouponRejection,
    },

    #[error(transparent)]
    NoticeViolation(NoticeViolation),

    #[error("Invalid window: {0}")]
    InvalidWindow(WindowError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidTransition(TransitionError),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    /// A provider event names a booking this engine does not know.
    #[error("Unknown booking reference: {0}")]
    UnknownBookingReference(String),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// Waiver service error.
    #[error("Waiver service error: {0}")]
    WaiverService(String),

    /// Notification service error.
    #[error("Notification service error: {0}")]
    NotificationService(String),

    /// The store could not be reached; the call is safe to retry.
    #[error("Transient store failure: {0}")]
    TransientStoreFailure(StoreError),

    /// The store returned something it should not have.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientStoreFailure(_) | EngineError::PaymentGateway(_)
        )
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Window(e) => EngineError::InvalidWindow(e),
            DomainError::Notice(e) => EngineError::NoticeViolation(e),
            DomainError::HoldRequest(e) => EngineError::InvalidRequest(e.to_string()),
            DomainError::Capacity(e) => EngineError::InsufficientAvailability {
                shortfalls: e.shortfalls,
            },
            DomainError::Price(e) => EngineError::PriceMismatch(e),
            DomainError::Coupon(reason) => EngineError::CouponRejected {
                code: String::new(),
                reason,
            },
            DomainError::Contact(e) => EngineError::InvalidRequest(e.to_string()),
            DomainError::Transition(e) => EngineError::InvalidTransition(e),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Capacity(e) => EngineError::InsufficientAvailability {
                shortfalls: e.shortfalls,
            },
            StoreError::HoldExpired(id) => EngineError::HoldExpired(id),
            StoreError::BookingNotFound(id) => EngineError::BookingNotFound(id),
            StoreError::Transition(e) => EngineError::InvalidTransition(e),
            other if other.is_transient() => EngineError::TransientStoreFailure(other),
            other => EngineError::Store(other),
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
