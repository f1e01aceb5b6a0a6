//! Applying asynchronous payment outcomes.

use std::sync::Arc;
use std::time::Instant;

use common::BookingId;
use domain::{Booking, Customer, PaymentEvent};
use store::{BookingStore, ReconcileOutcome, SideEffectKind, StoreError, Transition, WaiverUpsert};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::services::{BookingUpdate, Broadcaster, Email, Services, WaiverRequest};
use crate::settings::EngineSettings;

/// What happened to one provider event. Every variant is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReceipt {
    Applied(Transition),
    /// Seen before; nothing was written and no side effect re-ran.
    Duplicate,
    /// Carries neither a booking outcome nor a booking reference.
    Skipped,
    /// Processing failed; logged and alerted.
    Failed,
}

/// Publishes a booking's state, logging instead of failing.
pub(crate) async fn announce(broadcaster: &dyn Broadcaster, booking: &Booking) {
    if let Err(e) = broadcaster.publish(BookingUpdate::from_booking(booking)).await {
        tracing::warn!(booking_id = %booking.id, error = %e, "booking update broadcast failed");
    }
}

/// Drives bookings from provider events and dispatches the work owed after
/// a confirmation.
pub struct EventReconciler<S> {
    store: S,
    clock: Arc<dyn Clock>,
    services: Services,
    settings: EngineSettings,
}

impl<S: BookingStore + Clone> EventReconciler<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, services: Services, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            services,
            settings,
        }
    }

    /// Handles one provider delivery. Never fails toward the provider.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn on_payment_event(&self, event: &PaymentEvent) -> EventReceipt {
        let started = Instant::now();
        let receipt = match self.process(event).await {
            Ok(receipt) => receipt,
            Err(e) => {
                metrics::counter!("payment_event_failures_total").increment(1);
                tracing::error!(
                    alert = true,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    payment_ref = %event.payment_ref,
                    booking_ref = event.booking_ref.as_deref().unwrap_or("-"),
                    error = %e,
                    "failed to process payment event"
                );
                EventReceipt::Failed
            }
        };
        metrics::histogram!("payment_event_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        receipt
    }

    async fn process(&self, event: &PaymentEvent) -> Result<EventReceipt> {
        let Some(booking_id) = self.booking_for(event).await? else {
            if event.outcome.is_none() {
                tracing::debug!("event carries no booking outcome, acknowledged");
                return Ok(EventReceipt::Skipped);
            }
            return Err(EngineError::UnknownBookingReference(event.payment_ref.clone()));
        };

        let now = self.clock.now();
        let outcome = match self.store.apply_payment_event(booking_id, event, now).await {
            Err(StoreError::BookingNotFound(id)) => {
                return Err(EngineError::UnknownBookingReference(id.to_string()));
            }
            other => other?,
        };

        let applied = match outcome {
            ReconcileOutcome::Duplicate => {
                metrics::counter!("payment_events_total", "outcome" => "duplicate").increment(1);
                tracing::info!(%booking_id, "duplicate payment event");
                return Ok(EventReceipt::Duplicate);
            }
            ReconcileOutcome::Applied(applied) => applied,
        };

        let label = match applied.transition {
            Transition::Confirmed { revived: false } => "confirmed",
            Transition::Confirmed { revived: true } => "revived",
            Transition::Expired => "expired",
            Transition::Unchanged(_) => "ignored",
        };
        metrics::counter!("payment_events_total", "outcome" => label).increment(1);
        tracing::info!(
            %booking_id,
            from = %applied.previous_status,
            to = %applied.booking.status,
            outcome = label,
            "payment event applied"
        );

        if let Transition::Unchanged(ignored) = applied.transition {
            if event.outcome.is_some_and(|outcome| ignored.needs_refund(outcome)) {
                tracing::error!(
                    alert = true,
                    %booking_id,
                    payment_ref = %event.payment_ref,
                    reason = ignored.as_str(),
                    "payment received without a booking to confirm, refund required"
                );
            }
        } else {
            announce(self.services.broadcaster.as_ref(), &applied.booking).await;
        }

        for kind in &applied.side_effects {
            self.deliver(&applied.booking, *kind).await;
        }

        Ok(EventReceipt::Applied(applied.transition))
    }

    /// Maps an event to its booking: metadata first, then the ledger row
    /// for the payment id.
    async fn booking_for(&self, event: &PaymentEvent) -> Result<Option<BookingId>> {
        if let Some(reference) = event.booking_ref.as_deref() {
            return reference
                .parse::<BookingId>()
                .map(Some)
                .map_err(|_| EngineError::UnknownBookingReference(reference.to_string()));
        }
        Ok(self
            .store
            .find_payment(&event.payment_ref)
            .await?
            .map(|payment| payment.booking_id))
    }

    /// Redelivers outbox rows whose first delivery failed or never ran.
    ///
    /// Returns the number of rows attempted.
    pub async fn drain_outbox(&self) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = now - self.settings.outbox_grace;
        let due = self
            .store
            .pending_side_effects(self.settings.outbox_batch)
            .await?;

        let mut attempted = 0;
        for effect in due
            .into_iter()
            .filter(|e| e.attempts > 0 || e.created_at <= cutoff)
        {
            let Some(booking) = self.store.get_booking(effect.booking_id).await? else {
                tracing::warn!(booking_id = %effect.booking_id, kind = %effect.kind, "outbox row for missing booking");
                continue;
            };
            self.deliver(&booking, effect.kind).await;
            attempted += 1;
        }
        Ok(attempted)
    }

    async fn deliver(&self, booking: &Booking, kind: SideEffectKind) {
        let result = self.dispatch(booking, kind).await;
        let now = self.clock.now();

        let marked = match result {
            Ok(()) => {
                metrics::counter!("side_effects_dispatched_total", "kind" => kind.as_str())
                    .increment(1);
                self.store.complete_side_effect(booking.id, kind, now).await
            }
            Err(e) if kind == SideEffectKind::ConfirmationEmail => {
                tracing::warn!(booking_id = %booking.id, error = %e, "confirmation email not sent");
                self.store.complete_side_effect(booking.id, kind, now).await
            }
            Err(e) => {
                tracing::warn!(booking_id = %booking.id, %kind, error = %e, "side effect failed, will retry");
                self.store
                    .record_side_effect_failure(booking.id, kind, &e.to_string())
                    .await
            }
        };
        if let Err(e) = marked {
            tracing::warn!(booking_id = %booking.id, %kind, error = %e, "could not update outbox row");
        }
    }

    async fn dispatch(&self, booking: &Booking, kind: SideEffectKind) -> Result<()> {
        match kind {
            SideEffectKind::Waiver => {
                let document = self
                    .services
                    .waivers
                    .request_waiver(WaiverRequest {
                        business_id: booking.business_id,
                        customer_id: booking.customer_id,
                        booking_id: booking.id,
                    })
                    .await?;
                self.store
                    .upsert_waiver(
                        WaiverUpsert {
                            business_id: booking.business_id,
                            customer_id: booking.customer_id,
                            booking_id: booking.id,
                            document_id: document.document_id,
                            document_url: document.document_url,
                        },
                        self.clock.now(),
                    )
                    .await?;
            }
            SideEffectKind::ConfirmationEmail => {
                let customer = self
                    .store
                    .get_customer(booking.customer_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotificationService(format!(
                            "customer {} not found",
                            booking.customer_id
                        ))
                    })?;
                let email = confirmation_email(booking, &customer, &self.settings.notify_from);
                self.services.notifier.send(email).await?;
            }
        }
        Ok(())
    }
}

fn confirmation_email(booking: &Booking, customer: &Customer, from: &str) -> Email {
    let local_start = booking.window.start().with_timezone(&booking.timezone);
    let local_end = booking.window.end().with_timezone(&booking.timezone);
    let items: String = booking
        .items
        .iter()
        .map(|item| format!("<li>{} &times; {}</li>", item.quantity, item.name))
        .collect();

    Email {
        to: customer.email.clone(),
        from: from.to_string(),
        subject: format!("Booking confirmed for {}", local_start.format("%B %-d, %Y")),
        html: format!(
            "<p>Hi {name},</p>\
             <p>Your booking is confirmed for {start} to {end}.</p>\
             <ul>{items}</ul>\
             <p>Total: {total}</p>\
             <p>Reference: {id}</p>",
            name = customer.name,
            start = local_start.format("%B %-d, %Y %-I:%M %p"),
            end = local_end.format("%-I:%M %p %Z"),
            total = booking.pricing.total,
            id = booking.id,
        ),
    }
}
