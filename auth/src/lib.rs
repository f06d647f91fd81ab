//! # Sessionward Auth
//!
//! Server-side session lifecycle for a web application, stored in a
//! networked key-value store.
//!
//! ## Features
//!
//! - **Optimistic updates**: touch and refresh are read-modify-write
//!   transactions retried on conflict, so concurrent requests never lose a write
//! - **Constant-cost revocation**: logging a user out everywhere, or forcing
//!   their sessions to reload the user snapshot, is a single marker write
//! - **Event driven**: account events (credential changes, entitlement
//!   grants) are turned into markers by the [`SessionInvalidator`]
//! - **Testable**: the manager runs against an in-memory backend and a
//!   manual clock at memory speed
//!
//! ## Architecture
//!
//! ```text
//!   HTTP request ──▶ SessionManager ──▶ KvBackend (Redis)
//!                          ▲
//!   account events ──▶ SessionInvalidator ──▶ UserDirectory
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sessionward_auth::mocks::{InMemoryBackend, user_snapshot};
//! use sessionward_auth::{Role, SessionConfig, SessionManager};
//! use sessionward_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let clock = Arc::new(SystemClock);
//! let backend = Arc::new(InMemoryBackend::new(clock.clone()));
//! let manager = SessionManager::new(backend, clock, SessionConfig::default());
//!
//! let session = manager.start_session(user_snapshot("ada@example.com", Role::Member));
//! manager
//!     .create_session(&session, manager.config().idle_timeout)
//!     .await
//!     .unwrap();
//!
//! let loaded = manager.retrieve_session(&session.id).await.unwrap();
//! assert_eq!(loaded.user.email, "ada@example.com");
//! # });
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod invalidator;
pub mod keys;
pub mod manager;
pub mod providers;
pub mod retry;
pub mod state;
pub mod stores;

// Mocks (test-only)
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use config::{
    DEFAULT_ACCOUNT_EVENTS_TOPIC, InvalidatorConfig, MarkerPolicy, MarkerTtl, MarkerWrite,
    SessionConfig,
};
pub use error::{Result, SessionError};
pub use events::{AccountEvent, SessionEffect};
pub use invalidator::{Outcome, SessionInvalidator, SkipReason};
pub use manager::SessionManager;
pub use providers::{DirectoryError, KvBackend, KvError, KvWrite, UserDirectory};
pub use state::{Entitlement, Role, Session, SessionId, UserId, UserSnapshot};
pub use stores::RedisBackend;
