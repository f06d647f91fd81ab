//! Custom Axum extractors.
//!
//! - [`CurrentSession`]: the authenticated session, or 401
//! - [`MaybeSession`]: the session if there is one
//! - [`CorrelationId`]: the request's correlation id
//!
//! The session extractors read what the session middleware attached to the
//! request; they never touch the backend themselves.
//!
//! # Examples
//!
//! ```ignore
//! use sessionward_web::extractors::{CorrelationId, CurrentSession};
//!
//! async fn handler(CurrentSession(session): CurrentSession, correlation_id: CorrelationId) -> String {
//!     tracing::info!(correlation_id = %correlation_id, user_id = %session.user.id, "Handling request");
//!     session.user.email
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sessionward_auth::Session;
use std::fmt;

/// The session the request is authenticated with.
///
/// Rejects with 401 when the request has no valid session.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

/// The request's session, if it has a valid one.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<Session>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<CurrentSession>()
                .map(|current| current.0.clone()),
        ))
    }
}

/// Correlation id for request tracing.
///
/// Set by the correlation id middleware. Without the middleware it falls
/// back to the request header, then to a fresh UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(id.clone());
        }

        let id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(crate::middleware::accept_correlation_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self(id))
    }
}
