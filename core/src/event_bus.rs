//! Event bus abstraction with explicit acknowledgement.
//!
//! Domain events reach the session service through an [`EventBus`]. Delivery
//! is **at-least-once**: a subscriber receives each event wrapped in a
//! [`Delivery`] and must call [`Delivery::ack`] once the event's side effect
//! has been durably applied. A delivery that is dropped without being acked
//! is considered unprocessed and the transport will redeliver it (after a
//! restart or rebalance, depending on the implementation).
//!
//! ```text
//! ┌───────────────┐  Delivery   ┌──────────────┐
//! │   EventBus    │ ──────────▶ │  Subscriber  │
//! │  (transport)  │             │ apply effect │
//! │               │ ◀────────── │   then ack   │
//! └───────────────┘    Acker    └──────────────┘
//!        │
//!        ▼ commit offset only after ack
//! ```
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `sessionward-testing` - for tests
//! - `RedpandaEventBus` in `sessionward-redpanda` - Kafka-compatible transport

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event envelope
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Handle used to acknowledge a single delivery.
///
/// Acking is a one-shot signal back to the transport. Dropping an `Acker`
/// without calling [`Acker::ack`] leaves the event unacknowledged.
#[derive(Debug)]
pub struct Acker {
    tx: Option<oneshot::Sender<()>>,
}

impl Acker {
    /// Create an acker together with the receiver the transport waits on.
    ///
    /// The receiver resolves to `Ok(())` on ack and to `Err(_)` if the acker
    /// was dropped without acking.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An acker that is not connected to anything.
    ///
    /// Useful for transports without commit semantics.
    #[must_use]
    pub const fn detached() -> Self {
        Self { tx: None }
    }

    /// Acknowledge the delivery.
    pub fn ack(mut self) {
        if let Some(tx) = self.tx.take() {
            // The transport may already have gone away (shutdown); nothing to do then.
            let _ = tx.send(());
        }
    }
}

/// A single event handed to a subscriber, together with its acknowledgement handle.
#[derive(Debug)]
pub struct Delivery {
    /// The delivered event.
    pub event: SerializedEvent,
    acker: Acker,
}

impl Delivery {
    /// Wrap an event and its acker.
    #[must_use]
    pub const fn new(event: SerializedEvent, acker: Acker) -> Self {
        Self { event, acker }
    }

    /// Acknowledge this delivery.
    pub fn ack(self) {
        self.acker.ack();
    }

    /// Split into the event and its acker.
    #[must_use]
    pub fn into_parts(self) -> (SerializedEvent, Acker) {
        (self.event, self.acker)
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Design Principles
///
/// - **At-least-once**: Subscribers may receive duplicate events and must be idempotent
/// - **Explicit ack**: Progress is recorded only for acknowledged deliveries
/// - **No cross-partition ordering**: Subscribers must not rely on global order
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the bus can be shared as
/// `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// `key` selects the partition; events with the same key keep their
    /// relative order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
