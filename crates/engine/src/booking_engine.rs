//! Wiring of the engine components over one store.

use std::sync::Arc;

use common::BookingId;
use domain::{Booking, Payment};
use store::{BookingEventRecord, BookingStore};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ledger::HoldLedger;
use crate::materializer::BookingMaterializer;
use crate::reaper::Reaper;
use crate::reconciler::{EventReconciler, announce};
use crate::resolver::AvailabilityResolver;
use crate::services::Services;
use crate::settings::EngineSettings;

/// Every engine component, sharing one store, clock and set of services.
pub struct BookingEngine<S> {
    pub resolver: AvailabilityResolver<S>,
    pub ledger: HoldLedger<S>,
    pub materializer: BookingMaterializer<S>,
    pub reconciler: Arc<EventReconciler<S>>,
    pub reaper: Arc<Reaper<S>>,
    store: S,
    clock: Arc<dyn Clock>,
    services: Services,
}

impl<S: BookingStore + Clone + 'static> BookingEngine<S> {
    pub fn new(store: S, services: Services, settings: EngineSettings, clock: Arc<dyn Clock>) -> Self {
        let reconciler = Arc::new(EventReconciler::new(
            store.clone(),
            clock.clone(),
            services.clone(),
            settings.clone(),
        ));
        Self {
            resolver: AvailabilityResolver::new(store.clone(), clock.clone()),
            ledger: HoldLedger::new(store.clone(), clock.clone(), settings.hold_ttl),
            materializer: BookingMaterializer::new(
                store.clone(),
                clock.clone(),
                services.payments.clone(),
                settings,
            ),
            reaper: Arc::new(Reaper::new(
                store.clone(),
                clock.clone(),
                services.broadcaster.clone(),
                reconciler.clone(),
            )),
            reconciler,
            store,
            clock,
            services,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Loads a booking as stored. Use [`Booking::effective_status`] with
    /// [`Self::clock`] for the status callers should see.
    pub async fn booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    pub async fn booking_events(&self, booking_id: BookingId) -> Result<Vec<BookingEventRecord>> {
        self.booking(booking_id).await?;
        Ok(self.store.booking_events(booking_id).await?)
    }

    pub async fn payments(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        self.booking(booking_id).await?;
        Ok(self.store.payments_for_booking(booking_id).await?)
    }

    /// Cancels a HOLD, PENDING or CONFIRMED booking and frees its capacity.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_booking(&self, booking_id: BookingId, reason: &str) -> Result<Booking> {
        let booking = self
            .store
            .cancel_booking(booking_id, reason, self.clock.now())
            .await?;
        tracing::info!(%booking_id, reason, "booking cancelled");
        announce(self.services.broadcaster.as_ref(), &booking).await;
        Ok(booking)
    }
}
