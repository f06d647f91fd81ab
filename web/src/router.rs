//! Router composition.

use crate::handlers::{health_check, session};
use crate::middleware::{correlation_id_layer, session_layer};
use crate::state::SessionState;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use sessionward_auth::{KvBackend, UserDirectory};
use tower_http::trace::TraceLayer;

/// Build the HTTP application.
///
/// # Routes
///
/// - `GET /health` - Liveness
/// - `POST /api/v1/session/login` - Log in, issue the session cookie
/// - `POST /api/v1/session/logout` - End the current session
/// - `POST /api/v1/session/logout-everywhere` - End every session of the user
/// - `GET /api/v1/session/me` - Describe the current session
///
/// Session routes run behind [`session_layer`]. Every route runs inside the
/// correlation id span.
///
/// # Example
///
/// ```rust,ignore
/// let state = SessionState::new(manager, directory, CookieConfig::default());
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, router(state)).await?;
/// ```
pub fn router<B, D>(state: SessionState<B, D>) -> Router
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    let session_routes = Router::new()
        .route("/login", post(session::login::<B, D>))
        .route("/logout", post(session::logout::<B, D>))
        .route(
            "/logout-everywhere",
            post(session::logout_everywhere::<B, D>),
        )
        .route("/me", get(session::me));

    Router::new()
        .nest("/api/v1/session", session_routes)
        .layer(from_fn_with_state(state.clone(), session_layer::<B, D>))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
