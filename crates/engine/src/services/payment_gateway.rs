//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{BookingId, BusinessId};
use domain::Money;
use serde::Serialize;

use crate::error::EngineError;

/// A request to open a charge for a booking.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub booking_id: BookingId,
    pub business_id: BusinessId,
    pub amount: Money,
    pub currency: String,
    /// Repeated requests with the same key return the same intent.
    pub idempotency_key: String,
}

/// Handle the client completes payment against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub provider_payment_id: String,
    pub client_secret: String,
}

/// Trait for the external payment processor.
///
/// Outcomes arrive later as provider events carrying the booking id in
/// their metadata.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates (or returns the existing) charge intent for the key.
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, EngineError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<String, (BookingId, Money, PaymentIntent)>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory payment gateway for the default wiring and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to fail every create call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_create = fail;
    }

    /// Returns the number of distinct intents created.
    pub fn intent_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .len()
    }

    /// Returns the intent opened for a booking, if any.
    pub fn intent_for(&self, booking_id: BookingId) -> Option<PaymentIntent> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .values()
            .find(|(id, _, _)| *id == booking_id)
            .map(|(_, _, intent)| intent.clone())
    }

    /// Returns the amount charged by an intent.
    pub fn amount_for(&self, provider_payment_id: &str) -> Option<Money> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .values()
            .find(|(_, _, intent)| intent.provider_payment_id == provider_payment_id)
            .map(|(_, amount, _)| *amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, EngineError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_create {
            return Err(EngineError::PaymentGateway(
                "Payment processor unavailable".to_string(),
            ));
        }

        if let Some((_, _, intent)) = state.intents.get(&request.idempotency_key) {
            return Ok(intent.clone());
        }

        state.next_id += 1;
        let provider_payment_id = format!("pi_{:04}", state.next_id);
        let intent = PaymentIntent {
            client_secret: format!("{provider_payment_id}_secret"),
            provider_payment_id,
        };
        state.intents.insert(
            request.idempotency_key,
            (request.booking_id, request.amount, intent.clone()),
        );

        Ok(intent)
    }
}
