//! Event trait and the serialized wire format for domain events.
//!
//! Domain events (an entitlement was granted, a password was changed, ...)
//! travel between services as [`SerializedEvent`] envelopes. The payload is
//! `bincode`-encoded; the envelope carries a versioned `event_type` so that
//! consumers can route (or skip) events without decoding the payload.
//!
//! # Example
//!
//! ```
//! use sessionward_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum AccountEvent {
//!     PasswordChanged { user_id: String },
//! }
//!
//! impl Event for AccountEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             AccountEvent::PasswordChanged { .. } => "PasswordChanged.v1",
//!         }
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Payload encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// A domain event that can be published on the event bus.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix, e.g.
/// `"EntitlementCreated.v1"`. Consumers use it to decide whether they
/// understand the payload at all.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// belong to an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event as it travels over the event bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"EntitlementCreated.v1"`).
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Correlation identifier propagated from the producing request, if any.
    pub correlation_id: Option<String>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionward_core::event::SerializedEvent;
    ///
    /// let event = SerializedEvent::new("ProfileChanged.v1".to_string(), vec![1, 2, 3], None);
    /// assert_eq!(event.data.len(), 3);
    /// ```
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>, correlation_id: Option<String>) -> Self {
        Self {
            event_type,
            data,
            correlation_id,
        }
    }

    /// Create a serialized event from an `Event` value.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        correlation_id: Option<String>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            correlation_id,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
