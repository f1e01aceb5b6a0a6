//! Engine tunables.

use chrono::Duration;

/// Settings shared by the engine components.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lifetime of a checkout hold, and of a booking in HOLD status.
    pub hold_ttl: Duration,
    /// Lifetime of a booking waiting for its payment outcome.
    pub pending_ttl: Duration,
    /// ISO currency code for new bookings.
    pub currency: String,
    /// Sender address for confirmation emails.
    pub notify_from: String,
    /// Side effects redelivered per outbox pass.
    pub outbox_batch: usize,
    /// Age before a never-attempted outbox row is considered abandoned by
    /// the request that enqueued it.
    pub outbox_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(15),
            pending_ttl: Duration::hours(24),
            currency: "usd".to_string(),
            notify_from: "bookings@example.com".to_string(),
            outbox_batch: 50,
            outbox_grace: Duration::minutes(1),
        }
    }
}
