//! User directory trait.
//!
//! The user directory is the system of record for accounts. The session
//! system only reads from it: to authenticate a login, to reload a user
//! snapshot for a stale session, and to find which user an entitlement
//! belongs to when an event does not say.

use crate::state::{UserId, UserSnapshot};
use thiserror::Error;

/// Errors reported by a user directory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The user or entitlement does not exist.
    #[error("Not found in user directory")]
    NotFound,

    /// Email and password do not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The directory could not be reached.
    #[error("User directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the system of record.
pub trait UserDirectory: Send + Sync {
    /// Load the current snapshot of a user.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if the user does not exist
    /// - [`DirectoryError::Unavailable`] if the directory cannot be reached
    fn find_user(
        &self,
        user_id: UserId,
    ) -> impl std::future::Future<Output = Result<UserSnapshot, DirectoryError>> + Send;

    /// Verify a login and return the user's snapshot.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::InvalidCredentials`] if email or password is wrong
    /// - [`DirectoryError::Unavailable`] if the directory cannot be reached
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<UserSnapshot, DirectoryError>> + Send;

    /// Find the owner of an entitlement.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if the entitlement is unknown
    /// - [`DirectoryError::Unavailable`] if the directory cannot be reached
    fn owner_of_entitlement(
        &self,
        entitlement_id: &str,
    ) -> impl std::future::Future<Output = Result<UserId, DirectoryError>> + Send;
}
