//! Error types for session operations.

use crate::providers::{DirectoryError, KvError};
use crate::state::Session;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error taxonomy for the session manager.
///
/// Two variants are expected control flow rather than failures:
/// [`SessionError::SessionNotFound`] (treat the caller as unauthenticated)
/// and [`SessionError::SessionStale`] (reload the user snapshot and carry on).
/// See [`SessionError::is_expected`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════
    // Session State
    // ═══════════════════════════════════════════════════════════

    /// No live session with this id: never existed, expired, deleted or invalidated.
    #[error("Session not found")]
    SessionNotFound,

    /// A session with this id already exists.
    #[error("Session ID already exists")]
    SessionIdNotUnique,

    /// The session is valid but its user snapshot predates a staleness marker.
    ///
    /// Carries the session so the caller can refresh it without reading again.
    #[error("Session user data is stale")]
    SessionStale(Box<Session>),

    // ═══════════════════════════════════════════════════════════
    // Update Errors
    // ═══════════════════════════════════════════════════════════

    /// Optimistic update kept losing to concurrent writers.
    #[error("Optimistic update gave up after {attempts} attempts")]
    MaxAttemptsReached {
        /// Number of attempts made
        attempts: u32,
    },

    /// A mutation tried to change a field that is fixed at creation.
    #[error("Cannot change immutable session field: {field}")]
    ImmutableField {
        /// Name of the field
        field: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure Errors
    // ═══════════════════════════════════════════════════════════

    /// The operation did not finish before its deadline.
    #[error("Session operation timed out")]
    Timeout,

    /// Key-value backend failure.
    #[error(transparent)]
    Backend(#[from] KvError),

    /// Stored bytes could not be encoded or decoded.
    #[error("Session encoding error: {0}")]
    Codec(String),

    /// User directory failure.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl SessionError {
    /// Whether this is an expected outcome rather than a failure.
    ///
    /// Expected outcomes are logged at debug level at most.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::SessionNotFound | Self::SessionStale(_))
    }

    /// Whether the failure is transient and the caller may retry later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Backend(KvError::Transport(_))
                | Self::Directory(DirectoryError::Unavailable(_))
        )
    }
}
