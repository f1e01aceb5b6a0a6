//! External collaborators and in-memory implementations.
//!
//! Every call into these services happens after the state change that
//! needs it has committed.

pub mod broadcast;
pub mod notification;
pub mod payment_gateway;
pub mod waiver;

use std::sync::Arc;

pub use broadcast::{BookingUpdate, Broadcaster, ChannelBroadcaster};
pub use notification::{Email, InMemoryNotificationService, NotificationService};
pub use payment_gateway::{InMemoryPaymentGateway, IntentRequest, PaymentGateway, PaymentIntent};
pub use waiver::{InMemoryWaiverService, WaiverDocument, WaiverRequest, WaiverService};

/// The collaborators an engine is wired with.
#[derive(Clone)]
pub struct Services {
    pub payments: Arc<dyn PaymentGateway>,
    pub waivers: Arc<dyn WaiverService>,
    pub notifier: Arc<dyn NotificationService>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

impl Services {
    /// In-memory collaborators publishing to `broadcaster`.
    pub fn in_memory(broadcaster: ChannelBroadcaster) -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentGateway::new()),
            waivers: Arc::new(InMemoryWaiverService::new()),
            notifier: Arc::new(InMemoryNotificationService::new()),
            broadcaster: Arc::new(broadcaster),
        }
    }
}
