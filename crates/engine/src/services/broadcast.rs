//! Real-time booking updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, BusinessId};
use domain::{Booking, BookingStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::EngineError;

/// The state pushed to live listeners after a booking changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingUpdate {
    pub booking_id: BookingId,
    pub business_id: BusinessId,
    pub status: BookingStatus,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BookingUpdate {
    pub fn from_booking(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            business_id: booking.business_id,
            status: booking.status,
            updated_at: booking.updated_at,
            expires_at: booking.expires_at,
        }
    }
}

/// Best-effort push channel. Failures are logged by the caller, never
/// propagated into the state change that produced the update.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, update: BookingUpdate) -> Result<(), EngineError>;
}

/// Fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BookingUpdate>,
}

impl ChannelBroadcaster {
    /// Creates a channel buffering up to `capacity` updates per slow listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingUpdate> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, update: BookingUpdate) -> Result<(), EngineError> {
        // No listeners is not a failure.
        if let Ok(listeners) = self.sender.send(update) {
            tracing::trace!(listeners, "booking update broadcast");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: BookingStatus) -> BookingUpdate {
        BookingUpdate {
            booking_id: BookingId::new(),
            business_id: BusinessId::new(),
            status,
            updated_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_publish_without_listeners_succeeds() {
        let broadcaster = ChannelBroadcaster::new(4);
        assert!(broadcaster.publish(update(BookingStatus::Confirmed)).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribers_receive_updates() {
        let broadcaster = ChannelBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();

        let sent = update(BookingStatus::Expired);
        broadcaster.publish(sent.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), sent);
    }
}
