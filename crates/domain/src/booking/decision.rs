//! Deciding what a payment event does to a booking.
//!
//! Transition authority is the payment id, not arrival order: an outcome
//! for a payment that is not the booking's current attempt never moves the
//! booking, and nothing downgrades a confirmed booking.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::payment::{Payment, PaymentEvent, PaymentOutcome};

use super::aggregate::Booking;
use super::status::BookingStatus;

/// Why an event is recorded in the ledger without a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ignored {
    /// The event type carries no booking outcome.
    NoOutcome,
    /// Failure for a payment that is not the booking's current attempt.
    StaleAttempt,
    /// The booking is already confirmed by a different payment.
    AlreadyConfirmed,
    /// The booking already expired and the event cannot revive it.
    AlreadyExpired,
    BookingCancelled,
    /// The ledger already holds a completed outcome for this payment.
    ConflictingOutcome,
    /// A late payment arrived but the capacity is gone.
    CapacityLost,
}

impl Ignored {
    /// Money was received without a booking to show for it.
    pub fn needs_refund(&self, outcome: PaymentOutcome) -> bool {
        outcome == PaymentOutcome::Succeeded && *self != Ignored::NoOutcome
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Ignored::NoOutcome => "no_outcome",
            Ignored::StaleAttempt => "stale_attempt",
            Ignored::AlreadyConfirmed => "already_confirmed",
            Ignored::AlreadyExpired => "already_expired",
            Ignored::BookingCancelled => "booking_cancelled",
            Ignored::ConflictingOutcome => "conflicting_outcome",
            Ignored::CapacityLost => "capacity_lost",
        }
    }
}

/// What applying a payment event should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDecision {
    /// Already applied; no writes, no side effects.
    Duplicate,
    /// Confirm the booking. `revive` means it had expired and capacity
    /// must be re-checked first.
    Confirm { revive: bool },
    /// Expire the booking.
    Expire,
    /// Record the payment row only.
    Record(Ignored),
}

impl Booking {
    /// Decides how `event` affects this booking.
    ///
    /// `prior` is the ledger row already stored for the event's payment id.
    pub fn decide_payment(
        &self,
        event: &PaymentEvent,
        prior: Option<&Payment>,
        now: DateTime<Utc>,
    ) -> PaymentDecision {
        let Some(outcome) = event.outcome else {
            return PaymentDecision::Record(Ignored::NoOutcome);
        };

        if let Some(prior) = prior {
            if prior.status == outcome.status() {
                return PaymentDecision::Duplicate;
            }
            if !prior.status.can_become(outcome.status()) {
                return PaymentDecision::Record(Ignored::ConflictingOutcome);
            }
        }

        let is_current_attempt = self
            .payment_ref
            .as_deref()
            .is_none_or(|current| current == event.payment_ref);

        match (outcome, self.effective_status(now)) {
            (PaymentOutcome::Succeeded, BookingStatus::Confirmed) => {
                if self.confirmed_payment_ref.as_deref() == Some(event.payment_ref.as_str()) {
                    PaymentDecision::Duplicate
                } else {
                    PaymentDecision::Record(Ignored::AlreadyConfirmed)
                }
            }
            (PaymentOutcome::Succeeded, BookingStatus::Hold | BookingStatus::Pending) => {
                PaymentDecision::Confirm { revive: false }
            }
            (PaymentOutcome::Succeeded, BookingStatus::Expired) => {
                PaymentDecision::Confirm { revive: true }
            }
            (_, BookingStatus::Cancelled) => PaymentDecision::Record(Ignored::BookingCancelled),
            (PaymentOutcome::Failed, BookingStatus::Confirmed) => {
                PaymentDecision::Record(Ignored::AlreadyConfirmed)
            }
            (PaymentOutcome::Failed, BookingStatus::Hold | BookingStatus::Pending) => {
                if is_current_attempt {
                    PaymentDecision::Expire
                } else {
                    PaymentDecision::Record(Ignored::StaleAttempt)
                }
            }
            (PaymentOutcome::Failed, BookingStatus::Expired) => {
                // Lapsed but not yet written down: write it now.
                if self.status.can_expire() {
                    PaymentDecision::Expire
                } else {
                    PaymentDecision::Record(Ignored::AlreadyExpired)
                }
            }
        }
    }
}
