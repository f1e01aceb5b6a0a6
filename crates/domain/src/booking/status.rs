//! Booking state machine.

use serde::{Deserialize, Serialize};

/// The status of a booking in its lifecycle.
///
/// State transitions:
/// ```text
/// HOLD ──► PENDING ──┬──► CONFIRMED ──► CANCELLED
///   │         │      │        ▲
///   │         │      └──► EXPIRED (late payment may re-confirm)
///   └─────────┴─────────► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Materialized from a hold, payment not yet initiated.
    #[default]
    Hold,

    /// Payment initiated, awaiting the provider's outcome.
    Pending,

    /// Paid. Holds capacity permanently.
    Confirmed,

    /// Abandoned or failed. Capacity released.
    Expired,

    /// Cancelled by the business or customer (terminal).
    Cancelled,
}

impl BookingStatus {
    /// Returns true if payment can be initiated in this status.
    pub fn can_initiate_payment(&self) -> bool {
        matches!(self, BookingStatus::Hold)
    }

    /// Returns true if a successful payment may confirm the booking.
    ///
    /// `Expired` is included for late payments; capacity must be re-checked.
    pub fn can_confirm(&self) -> bool {
        matches!(
            self,
            BookingStatus::Hold | BookingStatus::Pending | BookingStatus::Expired
        )
    }

    pub fn can_expire(&self) -> bool {
        matches!(self, BookingStatus::Hold | BookingStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            BookingStatus::Hold | BookingStatus::Pending | BookingStatus::Confirmed
        )
    }

    /// Returns true if a booking in this status counts against capacity.
    pub fn claims_capacity(&self) -> bool {
        matches!(
            self,
            BookingStatus::Hold | BookingStatus::Pending | BookingStatus::Confirmed
        )
    }

    /// Returns true if the status only lasts until `expires_at`.
    pub fn is_provisional(&self) -> bool {
        matches!(self, BookingStatus::Hold | BookingStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Expired | BookingStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Hold => "HOLD",
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOLD" => Ok(BookingStatus::Hold),
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "EXPIRED" => Ok(BookingStatus::Expired),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}
