//! Account domain events consumed by the session invalidator.

use crate::state::UserId;
use serde::{Deserialize, Serialize};
use sessionward_core::event::{Event, EventError, SerializedEvent};

/// Event type of [`AccountEvent::EntitlementCreated`].
pub const ENTITLEMENT_CREATED: &str = "EntitlementCreated.v1";
/// Event type of [`AccountEvent::EntitlementRevoked`].
pub const ENTITLEMENT_REVOKED: &str = "EntitlementRevoked.v1";
/// Event type of [`AccountEvent::ProfileChanged`].
pub const PROFILE_CHANGED: &str = "ProfileChanged.v1";
/// Event type of [`AccountEvent::CredentialsChanged`].
pub const CREDENTIALS_CHANGED: &str = "CredentialsChanged.v1";

/// Changes in the system of record that affect sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    /// An entitlement was granted.
    EntitlementCreated {
        /// Entitlement id.
        entitlement_id: String,
        /// Owner, when the producer knows it.
        user_id: Option<UserId>,
    },

    /// An entitlement was revoked.
    EntitlementRevoked {
        /// Entitlement id.
        entitlement_id: String,
        /// Owner, when the producer knows it.
        user_id: Option<UserId>,
    },

    /// Email, role or other profile data changed.
    ProfileChanged {
        /// Affected user.
        user_id: UserId,
    },

    /// Password reset, credential rotation or account lock.
    CredentialsChanged {
        /// Affected user.
        user_id: UserId,
    },
}

/// What an event does to the affected user's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Sessions stay valid but must reload the user snapshot.
    MarkStale,
    /// Sessions are logged out.
    Invalidate,
}

/// Who an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject<'a> {
    /// The event names the user.
    User(UserId),
    /// The owner must be looked up from the entitlement id.
    Entitlement(&'a str),
}

impl AccountEvent {
    /// Decode an envelope.
    ///
    /// Returns `Ok(None)` for event types this service does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the payload does not
    /// decode, or decodes to a different type than the envelope claims.
    pub fn decode(event: &SerializedEvent) -> Result<Option<Self>, EventError> {
        if !matches!(
            event.event_type.as_str(),
            ENTITLEMENT_CREATED | ENTITLEMENT_REVOKED | PROFILE_CHANGED | CREDENTIALS_CHANGED
        ) {
            return Ok(None);
        }

        let decoded = Self::from_bytes(&event.data)?;
        if decoded.event_type() != event.event_type {
            return Err(EventError::DeserializationError(format!(
                "envelope says {} but payload is {}",
                event.event_type,
                decoded.event_type()
            )));
        }

        Ok(Some(decoded))
    }

    /// Effect on the subject's sessions.
    #[must_use]
    pub const fn effect(&self) -> SessionEffect {
        match self {
            Self::CredentialsChanged { .. } => SessionEffect::Invalidate,
            Self::EntitlementCreated { .. }
            | Self::EntitlementRevoked { .. }
            | Self::ProfileChanged { .. } => SessionEffect::MarkStale,
        }
    }

    /// The user the event is about, or the entitlement to resolve it from.
    #[must_use]
    pub fn subject(&self) -> Subject<'_> {
        match self {
            Self::EntitlementCreated {
                user_id: Some(user_id),
                ..
            }
            | Self::EntitlementRevoked {
                user_id: Some(user_id),
                ..
            }
            | Self::ProfileChanged { user_id }
            | Self::CredentialsChanged { user_id } => Subject::User(*user_id),
            Self::EntitlementCreated { entitlement_id, .. }
            | Self::EntitlementRevoked { entitlement_id, .. } => Subject::Entitlement(entitlement_id),
        }
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::EntitlementCreated { .. } => ENTITLEMENT_CREATED,
            Self::EntitlementRevoked { .. } => ENTITLEMENT_REVOKED,
            Self::ProfileChanged { .. } => PROFILE_CHANGED,
            Self::CredentialsChanged { .. } => CREDENTIALS_CHANGED,
        }
    }
}
