//! Persistence for the booking engine.
//!
//! [`BookingStore`] is the only seam between the engine and storage. Every
//! method that grants, consumes or transitions a capacity claim runs as one
//! atomic unit: a database transaction with per-item advisory locks in
//! PostgreSQL, the store-wide write lock in memory.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryBookingStore;
pub use postgres::PostgresBookingStore;
pub use store::{
    AppliedPaymentEvent, BookingEventRecord, BookingStore, Materialized, NewBooking,
    PaymentAttempt, ReapReport, ReconcileOutcome, SideEffect, SideEffectKind, Transition,
    WaiverUpsert,
};
