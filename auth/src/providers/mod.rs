//! Session providers.
//!
//! Traits for the two external dependencies of the session system. The
//! manager and the invalidator depend on these traits; the runtime supplies
//! concrete implementations.
//!
//! ```text
//! ┌────────────────────┐      ┌────────────────────┐
//! │ SessionManager     │      │ SessionInvalidator │
//! └─────────┬──────────┘      └─────────┬──────────┘
//!           │                           │
//!           ▼                           ▼
//! ┌────────────────────┐      ┌────────────────────┐
//! │ KvBackend          │      │ UserDirectory      │
//! │ (Redis / memory)   │      │ (system of record) │
//! └────────────────────┘      └────────────────────┘
//! ```
//!
//! This enables:
//! - **Testing**: in-memory backend and directory (see `mocks`)
//! - **Production**: Redis and the account service

pub mod kv_backend;
pub mod user_directory;

pub use kv_backend::{KvBackend, KvError, KvWrite};
pub use user_directory::{DirectoryError, UserDirectory};
