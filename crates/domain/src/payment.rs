//! Payment ledger rows and normalized provider events.

use chrono::{DateTime, Utc};
use common::{BookingId, BusinessId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Status of one payment attempt.
///
/// `Completed` and `Failed` are reported by the provider. `Completed` never
/// changes once written; `Failed` may still become `Completed` when the
/// customer retries on the same payment. `Pending` (attempt opened at
/// checkout) and `Expired` (assigned when an abandoned booking is reaped)
/// may be superseded by a provider outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl PaymentStatus {
    /// Whether a ledger row in this status may be rewritten to `next`.
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Pending | PaymentStatus::Expired => *self != next,
            PaymentStatus::Failed => next == PaymentStatus::Completed,
            PaymentStatus::Completed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// One payment attempt or outcome for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub business_id: BusinessId,
    /// Unique across the ledger.
    pub provider_payment_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome carried by a provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    /// The ledger status this outcome records.
    pub fn status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Succeeded => PaymentStatus::Completed,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Failed => "failed",
        }
    }
}

/// A provider event reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider's unique event id (deduplication key).
    pub event_id: String,
    /// Provider's event type, kept for logging.
    pub event_type: String,
    /// Payment or invoice id the outcome belongs to.
    pub payment_ref: String,
    /// Booking id from the event metadata, unparsed.
    pub booking_ref: Option<String>,
    /// `None` for event types that carry no booking outcome.
    pub outcome: Option<PaymentOutcome>,
    pub amount: Option<Money>,
    pub currency: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("REFUNDED".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn failed_payment_can_still_complete() {
        assert!(PaymentStatus::Failed.can_become(PaymentStatus::Completed));
        assert!(PaymentStatus::Pending.can_become(PaymentStatus::Failed));
        assert!(PaymentStatus::Expired.can_become(PaymentStatus::Completed));
        assert!(!PaymentStatus::Completed.can_become(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_become(PaymentStatus::Failed));
    }
}
