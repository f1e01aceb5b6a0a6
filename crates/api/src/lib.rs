//! HTTP API server with observability for the rental booking engine.
//!
//! Provides REST endpoints for availability, holds, checkout and payment
//! webhooks, a Server-Sent-Events stream of booking changes, structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use engine::{BookingEngine, ChannelBroadcaster, Clock, EngineSettings, Services, SystemClock};
use metrics_exporter_prometheus::PrometheusHandle;
use store::BookingStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub engine: Arc<BookingEngine<S>>,
    /// Source of the booking update stream; the engine publishes into it.
    pub updates: ChannelBroadcaster,
    /// Payment webhook signing secret. `None` skips verification.
    pub webhook_secret: Option<String>,
}

impl<S: BookingStore + Clone + 'static> AppState<S> {
    pub fn new(
        engine: Arc<BookingEngine<S>>,
        updates: ChannelBroadcaster,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            engine,
            updates,
            webhook_secret,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookingStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/businesses/{business_id}/availability",
            get(routes::availability::search::<S>),
        )
        .route(
            "/businesses/{business_id}/holds",
            post(routes::holds::create::<S>),
        )
        .route("/holds/{hold_id}", delete(routes::holds::release::<S>))
        .route(
            "/holds/{hold_id}/booking",
            post(routes::bookings::materialize::<S>),
        )
        .route("/bookings/{booking_id}", get(routes::bookings::get::<S>))
        .route(
            "/bookings/{booking_id}/events",
            get(routes::bookings::events::<S>),
        )
        .route(
            "/bookings/{booking_id}/payments",
            get(routes::bookings::payments::<S>),
        )
        .route(
            "/bookings/{booking_id}/cancel",
            post(routes::bookings::cancel::<S>),
        )
        .route(
            "/businesses/{business_id}/bookings/stream",
            get(routes::stream::bookings::<S>),
        )
        .route("/webhooks/payments", post(routes::webhooks::payments::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state: in-memory collaborators and the
/// system clock over `store`.
pub fn create_default_state<S: BookingStore + Clone + 'static>(
    store: S,
    settings: EngineSettings,
    webhook_secret: Option<String>,
) -> Arc<AppState<S>> {
    let updates = ChannelBroadcaster::default();
    let services = Services::in_memory(updates.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(BookingEngine::new(store, services, settings, clock));
    Arc::new(AppState::new(engine, updates, webhook_secret))
}
