//! Background cleanup of lapsed holds and bookings.
//!
//! Correctness never depends on this running: every read already treats
//! lapsed rows as expired. The reaper writes that down, broadcasts the
//! change and retries outbox rows.

use std::future::Future;
use std::sync::Arc;

use store::BookingStore;

use crate::clock::Clock;
use crate::error::Result;
use crate::reconciler::{EventReconciler, announce};
use crate::services::Broadcaster;

/// Counts from one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub holds_deleted: u64,
    pub bookings_expired: usize,
    pub payments_expired: u64,
    pub side_effects_retried: usize,
}

pub struct Reaper<S> {
    store: S,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<dyn Broadcaster>,
    reconciler: Arc<EventReconciler<S>>,
}

impl<S: BookingStore + Clone + 'static> Reaper<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        broadcaster: Arc<dyn Broadcaster>,
        reconciler: Arc<EventReconciler<S>>,
    ) -> Self {
        Self {
            store,
            clock,
            broadcaster,
            reconciler,
        }
    }

    /// Runs one pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReapSummary> {
        let report = self.store.reap_expired(self.clock.now()).await?;

        metrics::counter!("reaper_expired_total", "kind" => "holds").increment(report.holds_deleted);
        metrics::counter!("reaper_expired_total", "kind" => "bookings")
            .increment(report.expired_bookings.len() as u64);
        metrics::counter!("reaper_expired_total", "kind" => "payments")
            .increment(report.payments_expired);

        for booking in &report.expired_bookings {
            announce(self.broadcaster.as_ref(), booking).await;
        }

        let side_effects_retried = self.reconciler.drain_outbox().await?;

        let summary = ReapSummary {
            holds_deleted: report.holds_deleted,
            bookings_expired: report.expired_bookings.len(),
            payments_expired: report.payments_expired,
            side_effects_retried,
        };
        if summary != ReapSummary::default() {
            tracing::info!(
                holds = summary.holds_deleted,
                bookings = summary.bookings_expired,
                payments = summary.payments_expired,
                retried = summary.side_effects_retried,
                "reaper pass complete"
            );
        }
        Ok(summary)
    }

    /// Runs a pass every `every` until `shutdown` resolves. A failed pass is
    /// logged and the loop continues.
    pub async fn run(self: Arc<Self>, every: std::time::Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "reaper pass failed");
                    }
                }
            }
        }
    }
}
