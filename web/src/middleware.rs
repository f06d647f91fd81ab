//! Axum middleware for the request path.
//!
//! - **Correlation ids**: [`correlation_id_layer`] reads or mints an id, runs
//!   the request inside an `http_request` span carrying it, and echoes it in
//!   the response
//! - **Sessions**: [`session_layer`] resolves the session cookie into a
//!   [`CurrentSession`] before the handler runs
//!
//! # Session flow
//!
//! ```text
//! cookie? ──no──────────────────────────────────────▶ handler (anonymous)
//!    │yes
//!    ▼
//! retrieve ──SessionNotFound──▶ handler (anonymous), cookie cleared
//!    │ok        │stale
//!    │          ▼
//!    │      reload user, refresh ──user gone──▶ delete, anonymous
//!    ▼          │
//! handler ◀─────┘
//!    │
//!    ▼
//! response sent; touch runs in the background
//! ```

use crate::error::AppError;
use crate::extractors::{CorrelationId, CurrentSession};
use crate::state::SessionState;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sessionward_auth::{
    DirectoryError, KvBackend, Session, SessionError, SessionId, UserDirectory,
};
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Longest correlation id accepted from a client.
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Accept a client-supplied correlation id if it is short and made of
/// URL-safe characters; anything else is replaced with a fresh one.
pub(crate) fn accept_correlation_id(raw: &str) -> Option<String> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_CORRELATION_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    valid.then(|| raw.to_string())
}

/// Create a layer that adds correlation id tracking to all requests.
///
/// # Example
///
/// ```ignore
/// use axum::Router;
/// use sessionward_web::middleware::correlation_id_layer;
///
/// let app = Router::new()
///     .route("/health", get(health_check))
///     .layer(correlation_id_layer());
/// ```
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation id tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation id tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(accept_correlation_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let header_value = HeaderValue::from_str(&correlation_id).ok();
        req.extensions_mut().insert(CorrelationId(correlation_id));

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Some(header_value) = header_value {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Response extension set by handlers that end the request's session, so
/// the middleware does not touch it afterwards.
#[derive(Debug, Clone, Copy)]
pub struct SessionEnded;

/// Resolve the session cookie before the handler runs.
///
/// Install with `axum::middleware::from_fn_with_state`. See the module docs
/// for the flow. Infrastructure failures (backend, directory, contention)
/// end the request with the mapped [`AppError`] instead of silently
/// downgrading it to anonymous.
pub async fn session_layer<B, D>(
    State(state): State<SessionState<B, D>>,
    mut request: Request,
    next: Next,
) -> Response
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    let Some(id) = state.cookies.session_id(request.headers()) else {
        return next.run(request).await;
    };

    let deadline = Instant::now() + state.manager.config().operation_timeout;
    let resolved = match resolve(&state, &id, deadline).await {
        Ok(resolved) => resolved,
        Err(e) => return AppError::from(e).into_response(),
    };

    let Some(session) = resolved else {
        let mut response = next.run(request).await;
        if !response.headers().contains_key(header::SET_COOKIE) {
            match state.cookies.removal() {
                Ok(cookie) => {
                    response.headers_mut().append(header::SET_COOKIE, cookie);
                }
                Err(e) => tracing::warn!(error = %e, "Invalid session cookie configuration"),
            }
        }
        return response;
    };

    request.extensions_mut().insert(CurrentSession(session));
    let response = next.run(request).await;

    if response.extensions().get::<SessionEnded>().is_none() {
        spawn_touch(&state, id);
    }

    response
}

/// `Ok(None)` means the request continues anonymously.
async fn resolve<B, D>(
    state: &SessionState<B, D>,
    id: &SessionId,
    deadline: Instant,
) -> Result<Option<Session>, SessionError>
where
    B: KvBackend + 'static,
    D: UserDirectory,
{
    let manager = state.manager.with_deadline(deadline);

    let stale = match manager.retrieve_session(id).await {
        Ok(session) => return Ok(Some(session)),
        Err(SessionError::SessionNotFound) => return Ok(None),
        Err(SessionError::SessionStale(stale)) => stale,
        Err(e) => return Err(e),
    };

    let user = match tokio::time::timeout_at(deadline, state.directory.find_user(stale.user.id)).await
    {
        Ok(Ok(user)) => user,
        Ok(Err(DirectoryError::NotFound)) => {
            tracing::info!(
                session_id = %id,
                user_id = %stale.user.id,
                "User no longer exists, ending session"
            );
            if let Err(e) = manager.delete_session(id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to delete orphaned session");
            }
            return Ok(None);
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(SessionError::Timeout),
    };

    match manager.refresh_session(id, user).await {
        Ok(session) => Ok(Some(session)),
        Err(SessionError::SessionNotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn spawn_touch<B, D>(state: &SessionState<B, D>, id: SessionId)
where
    B: KvBackend + 'static,
{
    let manager = state.manager.clone();
    tokio::spawn(
        async move {
            match manager.touch_session(&id).await {
                Ok(_) => {}
                Err(SessionError::SessionNotFound) => {
                    tracing::debug!(session_id = %id, "Session gone before touch");
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Failed to record session activity");
                }
            }
        }
        .in_current_span(),
    );
}
