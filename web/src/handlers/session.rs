//! Session endpoints.
//!
//! Login issues the session cookie; logout and logout-everywhere clear it.
//! Everything else relies on the session middleware having resolved the
//! cookie before the handler runs.

use crate::error::AppError;
use crate::extractors::{CorrelationId, CurrentSession, MaybeSession};
use crate::middleware::SessionEnded;
use crate::state::SessionState;
use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionward_auth::{KvBackend, Role, Session, SessionError, UserDirectory};

/// Login request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionView {
    /// Session id.
    pub session_id: String,
    /// Authenticated user.
    pub user_id: String,
    /// User's email at snapshot time.
    pub email: String,
    /// User's role at snapshot time.
    pub role: Role,
    /// Entitlement kinds at snapshot time.
    pub entitlements: Vec<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last recorded activity.
    pub last_activity_at: DateTime<Utc>,
    /// When the user snapshot was last reloaded.
    pub refreshed_at: DateTime<Utc>,
    /// Hard end of the session.
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            user_id: session.user.id.to_string(),
            email: session.user.email.clone(),
            role: session.user.role,
            entitlements: session
                .user
                .entitlements
                .iter()
                .map(|e| e.kind.clone())
                .collect(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            refreshed_at: session.refreshed_at,
            expires_at: session.absolute_expiration,
        }
    }
}

/// Log in with email and password.
///
/// Any session the request already carries is ended first.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/session/login
/// Content-Type: application/json
///
/// {
///   "email": "user@example.com",
///   "password": "..."
/// }
/// ```
///
/// # Response
///
/// `200 OK` with a [`SessionView`] body and a `Set-Cookie` header.
///
/// # Errors
///
/// - `401` if the credentials are wrong
/// - `503` if the directory or session store is unavailable
pub async fn login<B, D>(
    State(state): State<SessionState<B, D>>,
    correlation_id: CorrelationId,
    MaybeSession(existing): MaybeSession,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError>
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let user = match state
        .directory
        .authenticate(request.email.trim(), &request.password)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            metrics::counter!("session_logins_total", "outcome" => "rejected").increment(1);
            tracing::info!(correlation_id = %correlation_id, error = %e, "Login rejected");
            return Err(e.into());
        }
    };

    if let Some(previous) = existing {
        state.manager.delete_session(&previous.id).await?;
    }

    let config = state.manager.config();
    let mut session = state.manager.start_session(user.clone());
    match state
        .manager
        .create_session(&session, config.idle_timeout)
        .await
    {
        Ok(()) => {}
        Err(SessionError::SessionIdNotUnique) => {
            session = state.manager.start_session(user);
            state
                .manager
                .create_session(&session, config.idle_timeout)
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    let cookie = state
        .cookies
        .issue(&session.id, config.absolute_lifetime)
        .map_err(|e| AppError::internal("Invalid session cookie configuration").with_source(e.into()))?;

    metrics::counter!("session_logins_total", "outcome" => "accepted").increment(1);
    tracing::info!(
        correlation_id = %correlation_id,
        session_id = %session.id,
        user_id = %session.user.id,
        "Login succeeded"
    );

    let mut response = Json(SessionView::from(&session)).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

/// Describe the current session.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/session/me
/// ```
///
/// # Errors
///
/// `401` without a valid session.
#[allow(clippy::unused_async)]
pub async fn me(CurrentSession(session): CurrentSession) -> Json<SessionView> {
    Json(SessionView::from(&session))
}

/// End the current session, if any.
///
/// Always clears the cookie and answers `204 No Content`.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/session/logout
/// ```
///
/// # Errors
///
/// `503` if the session store is unavailable.
pub async fn logout<B, D>(
    State(state): State<SessionState<B, D>>,
    MaybeSession(session): MaybeSession,
) -> Result<Response, AppError>
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    if let Some(session) = session {
        state.manager.delete_session(&session.id).await?;
    }

    ended(&state)
}

/// End every session of the current user, on every device.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/session/logout-everywhere
/// ```
///
/// # Errors
///
/// - `401` without a valid session
/// - `503` if the session store is unavailable
pub async fn logout_everywhere<B, D>(
    State(state): State<SessionState<B, D>>,
    CurrentSession(session): CurrentSession,
) -> Result<Response, AppError>
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    state.manager.log_out_everywhere(session.user.id).await?;

    tracing::info!(
        session_id = %session.id,
        user_id = %session.user.id,
        "Logged out everywhere"
    );

    ended(&state)
}

fn ended<B, D>(state: &SessionState<B, D>) -> Result<Response, AppError> {
    let cookie: HeaderValue = state
        .cookies
        .removal()
        .map_err(|e| AppError::internal("Invalid session cookie configuration").with_source(e.into()))?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    response.extensions_mut().insert(SessionEnded);
    Ok(response)
}
