//! Domain error types.

use thiserror::Error;

use crate::availability::CapacityError;
use crate::booking::TransitionError;
use crate::customer::ContactError;
use crate::hold::HoldRequestError;
use crate::policy::NoticeViolation;
use crate::pricing::{CouponRejection, PriceMismatch};
use crate::window::WindowError;

/// Errors that can occur in pure domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Invalid window: {0}")]
    Window(#[from] WindowError),

    #[error("Notice window violated: {0}")]
    Notice(#[from] NoticeViolation),

    #[error("Invalid hold request: {0}")]
    HoldRequest(#[from] HoldRequestError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Price(#[from] PriceMismatch),

    #[error("Coupon rejected: {0}")]
    Coupon(#[from] CouponRejection),

    #[error("Invalid customer contact: {0}")]
    Contact(#[from] ContactError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
