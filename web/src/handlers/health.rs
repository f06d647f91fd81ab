//! Health check endpoint.
//!
//! Used by load balancers to verify the process is up.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK while the process is serving. Does NOT check Redis or the
/// broker; a session request is the readiness signal.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
