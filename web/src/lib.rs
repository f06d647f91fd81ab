//! HTTP request path for sessionward.
//!
//! Resolves the session cookie on every request, exposes the result to
//! handlers through extractors, and serves the login/logout endpoints.
//!
//! # Request Flow
//!
//! 1. **Correlation id** is read or minted and attached to the request span
//! 2. **Session cookie** is resolved; stale sessions are refreshed from the
//!    user directory, invalidated ones are dropped
//! 3. **Handler** runs with [`CurrentSession`] or anonymously
//! 4. **Touch** records activity in the background once the response is built
//!
//! # Example
//!
//! ```ignore
//! use sessionward_web::{CookieConfig, SessionState, router};
//!
//! let state = SessionState::new(manager, Arc::new(directory), CookieConfig::default());
//! let app = router(state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cookie;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use cookie::{CookieConfig, SameSite};
pub use error::AppError;
pub use extractors::{CorrelationId, CurrentSession, MaybeSession};
pub use middleware::{CORRELATION_ID_HEADER, SessionEnded, correlation_id_layer, session_layer};
pub use router::router;
pub use state::SessionState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
