//! Booking reservation and confirmation engine.
//!
//! The engine sells time-boxed rental inventory without double-booking
//! while payment outcomes arrive asynchronously:
//!
//! 1. [`AvailabilityResolver`] answers what is free for a window, buffers included
//! 2. [`HoldLedger`] grants short exclusive holds, re-checked under lock
//! 3. [`BookingMaterializer`] turns a hold into exactly one booking and opens its payment
//! 4. [`EventReconciler`] applies provider events idempotently and dispatches
//!    waiver and email work after commit
//! 5. [`Reaper`] writes down lapsed holds and bookings and retries the outbox
//!
//! External systems sit behind the traits in [`services`].

pub mod booking_engine;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod materializer;
pub mod reaper;
pub mod reconciler;
pub mod resolver;
pub mod services;
pub mod settings;
pub mod webhook;

pub use booking_engine::BookingEngine;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EngineError, Result};
pub use ledger::HoldLedger;
pub use materializer::{BookingMaterializer, MaterializeRequest, MaterializedBooking};
pub use reaper::{ReapSummary, Reaper};
pub use reconciler::{EventReceipt, EventReconciler};
pub use resolver::AvailabilityResolver;
pub use services::{
    BookingUpdate, Broadcaster, ChannelBroadcaster, Email, InMemoryNotificationService,
    InMemoryPaymentGateway, InMemoryWaiverService, IntentRequest, NotificationService,
    PaymentGateway, PaymentIntent, Services, WaiverDocument, WaiverRequest, WaiverService,
};
pub use settings::EngineSettings;
pub use webhook::WebhookError;
