//! Aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts that already happened, named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, stored next to the payload.
    fn event_type(&self) -> &'static str;
}

/// An entity whose state changes only by applying its own events.
///
/// Commands are decided against the current state and yield an event;
/// `apply` folds that event in. `apply` is pure and infallible.
pub trait Aggregate: Send + Sync {
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    fn apply(&mut self, event: &Self::Event);
}
