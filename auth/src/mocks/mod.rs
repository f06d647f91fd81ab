//! Mock provider implementations for testing.
//!
//! In-memory implementations of the provider traits for unit and
//! integration tests, plus small fixtures.

pub mod kv_backend;
pub mod user_directory;

pub use kv_backend::InMemoryBackend;
pub use user_directory::MockUserDirectory;

use crate::state::{Role, UserId, UserSnapshot};

/// A user snapshot with a fresh id and no entitlements.
#[must_use]
pub fn user_snapshot(email: &str, role: Role) -> UserSnapshot {
    UserSnapshot {
        id: UserId::new(),
        email: email.to_string(),
        role,
        entitlements: Vec::new(),
    }
}
