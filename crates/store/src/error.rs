use common::{BookingId, HoldId};
use domain::{CapacityError, TransitionError};
use thiserror::Error;

/// Errors that can occur when interacting with the booking store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested quantities did not fit when re-checked under lock.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// The hold does not exist or has expired.
    #[error("Hold not found or expired: {0}")]
    HoldExpired(HoldId),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A stored value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for failures where retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
