//! Session data model.
//!
//! All types are `Clone` and serde-serializable. The byte-level record format
//! lives in [`crate::codec`]; these types are what the rest of the system sees.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Number of random bytes in a session id.
const SESSION_ID_BYTES: usize = 32;

/// Length of a session id once base64url-encoded (no padding).
const SESSION_ID_LEN: usize = 43;

/// Opaque session token handed to clients.
///
/// 256 bits from the operating system CSPRNG, base64url-encoded without
/// padding. Ids coming back from clients go through [`SessionId::parse`] so
/// that garbage never reaches the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new cryptographically secure random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parse a client-supplied token.
    ///
    /// Returns `None` unless the token has exactly the shape produced by
    /// [`SessionId::generate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use sessionward_auth::state::SessionId;
    ///
    /// let id = SessionId::generate();
    /// assert_eq!(SessionId::parse(id.as_str()), Some(id));
    /// assert_eq!(SessionId::parse("not a token"), None);
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == SESSION_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(raw.to_string()))
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a user in the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    /// Generate a new random `UserId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// User Snapshot
// ═══════════════════════════════════════════════════════════════════════

/// Role of the authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Regular account holder.
    Member,
    /// Administrator.
    Admin,
}

/// Something the user is entitled to (a subscription, a feature grant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Identifier in the system of record.
    pub id: String,
    /// Kind of entitlement, e.g. `"subscription:pro"`.
    pub kind: String,
    /// When it was granted.
    pub granted_at: DateTime<Utc>,
}

/// Copy of the authenticated principal taken from the system of record.
///
/// Only [`Session::refresh`] replaces it; nothing in this crate writes it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// User id.
    pub id: UserId,
    /// Email address at snapshot time.
    pub email: String,
    /// Role at snapshot time.
    pub role: Role,
    /// Entitlements at snapshot time.
    pub entitlements: Vec<Entitlement>,
}

impl UserSnapshot {
    /// Whether the snapshot carries an entitlement of the given kind.
    #[must_use]
    pub fn has_entitlement(&self, kind: &str) -> bool {
        self.entitlements.iter().any(|e| e.kind == kind)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

/// One authenticated client interaction.
///
/// Invariants kept by the methods below:
/// - `created_at <= last_activity_at`
/// - `created_at <= refreshed_at`
/// - `id` and `created_at` never change after construction
///
/// Validity and freshness are not stored here. They are derived at read
/// time by comparing `created_at` / `refreshed_at` against the per-user
/// markers (see [`crate::manager::SessionManager::retrieve_session`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique token.
    pub id: SessionId,
    /// Snapshot of the authenticated principal.
    pub user: UserSnapshot,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Updated by every touch.
    pub last_activity_at: DateTime<Utc>,
    /// Updated when `user` is reloaded from the system of record.
    pub refreshed_at: DateTime<Utc>,
    /// Hard ceiling; the session is dead past this instant regardless of activity.
    pub absolute_expiration: DateTime<Utc>,
}

impl Session {
    /// Start a new session for `user` at `now`.
    #[must_use]
    pub fn new(
        id: SessionId,
        user: UserSnapshot,
        now: DateTime<Utc>,
        absolute_lifetime: Duration,
    ) -> Self {
        Self {
            id,
            user,
            created_at: now,
            last_activity_at: now,
            refreshed_at: now,
            absolute_expiration: now + absolute_lifetime,
        }
    }

    /// Whether the absolute expiration has been reached at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.absolute_expiration
    }

    /// Record activity.
    ///
    /// `last_activity_at` strictly increases even if the clock has not moved
    /// (or moved backwards) since the previous touch.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.last_activity_at + Duration::microseconds(1);
        self.last_activity_at = now.max(floor);
    }

    /// Replace the user snapshot with a freshly loaded one.
    pub fn refresh(&mut self, user: UserSnapshot, now: DateTime<Utc>) {
        self.user = user;
        self.refreshed_at = now.max(self.created_at);
    }

    /// Time left until the absolute expiration (zero when already past).
    #[must_use]
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Duration {
        (self.absolute_expiration - now).max(Duration::zero())
    }
}
