//! HTTP-level tests for the session request path.
//!
//! Each test drives the full router (correlation layer, session middleware,
//! handlers) with `oneshot` requests against the in-memory backend and a
//! mock user directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use chrono::{Duration, Utc};
use sessionward_auth::mocks::{InMemoryBackend, MockUserDirectory, user_snapshot};
use sessionward_auth::{
    Role, SessionConfig, SessionError, SessionId, SessionManager, UserSnapshot,
};
use sessionward_core::environment::Clock;
use sessionward_testing::ManualClock;
use sessionward_web::handlers::SessionView;
use sessionward_web::{CORRELATION_ID_HEADER, CookieConfig, SessionState, router};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery staple";

struct TestApp {
    router: Router,
    manager: SessionManager<InMemoryBackend>,
    directory: Arc<MockUserDirectory>,
    clock: Arc<ManualClock>,
    user: UserSnapshot,
}

impl TestApp {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(InMemoryBackend::new(clock.clone()));
        let manager = SessionManager::new(backend, clock.clone(), SessionConfig::default());
        let directory = Arc::new(MockUserDirectory::new());

        let user = user_snapshot("ada@example.com", Role::Member);
        directory.insert_user(user.clone(), PASSWORD);

        let state = SessionState::new(manager.clone(), directory.clone(), CookieConfig::default());

        Self {
            router: router(state),
            manager,
            directory,
            clock,
            user,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Log in and return the `name=value` pair to send back as a cookie.
    async fn login(&self) -> (String, SessionView) {
        let response = self.send(login_request("ada@example.com", PASSWORD, None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = set_cookie(&response).expect("login sets a cookie");
        let pair = cookie.split(';').next().unwrap().to_string();
        let view: SessionView = json(response).await;
        (pair, view)
    }

    async fn me(&self, cookie: &str) -> Response<Body> {
        self.send(
            Request::get("/api/v1/session/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn login_request(email: &str, password: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/api/v1/session/login")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(
            serde_json::json!({ "email": email, "password": password }).to_string(),
        ))
        .unwrap()
}

fn post(uri: &str, cookie: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

fn session_id(view: &SessionView) -> SessionId {
    SessionId::parse(&view.session_id).unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_login_me_logout() {
    sessionward_testing::init_tracing();
    let app = TestApp::new();

    let (cookie, view) = app.login().await;
    assert_eq!(view.email, "ada@example.com");
    assert_eq!(view.user_id, app.user.id.to_string());

    let response = app.me(&cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me: SessionView = json(response).await;
    assert_eq!(me.session_id, view.session_id);

    let response = app.send(post("/api/v1/session/logout", &cookie)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(set_cookie(&response).unwrap().starts_with("sid=; Path=/; Max-Age=0"));

    // The old cookie no longer authenticates, and the browser is told to drop it
    let response = app.me(&cookie).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn test_login_cookie_attributes() {
    let app = TestApp::new();
    let response = app.send(login_request("ada@example.com", PASSWORD, None)).await;

    let cookie = set_cookie(&response).unwrap();
    let max_age = SessionConfig::default().absolute_lifetime.num_seconds();
    assert!(cookie.contains(&format!("Max-Age={max_age}")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let app = TestApp::new();

    let response = app.send(login_request("ada@example.com", "guess", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());

    let response = app.send(login_request("", PASSWORD, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_or_malformed_cookie_is_anonymous() {
    let app = TestApp::new();

    let response = app
        .send(Request::get("/api/v1/session/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.me("sid=not-a-session").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());

    // Logout without a session still clears the cookie
    let response = app.send(post("/api/v1/session/logout", "theme=dark")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_login_replaces_existing_session() {
    let app = TestApp::new();
    let (cookie, first) = app.login().await;

    let response = app
        .send(login_request("ada@example.com", PASSWORD, Some(&cookie)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second: SessionView = json(response).await;

    assert_ne!(first.session_id, second.session_id);
    assert_eq!(
        app.manager.retrieve_session(&session_id(&first)).await,
        Err(SessionError::SessionNotFound)
    );
    assert!(app.manager.retrieve_session(&session_id(&second)).await.is_ok());
}

#[tokio::test]
async fn test_stale_session_refreshed_from_directory() {
    let app = TestApp::new();
    let (cookie, view) = app.login().await;

    let mut promoted = app.user.clone();
    promoted.role = Role::Admin;
    app.directory.update_user(promoted);
    app.manager
        .mark_stale_user_sessions_before(app.user.id, app.clock.now())
        .await
        .unwrap();
    app.clock.advance(Duration::seconds(1));

    let response = app.me(&cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me: SessionView = json(response).await;

    assert_eq!(me.role, Role::Admin);
    assert_eq!(me.session_id, view.session_id);
    assert_eq!(me.refreshed_at, app.clock.now());
}

#[tokio::test]
async fn test_stale_session_of_removed_user_is_deleted() {
    let app = TestApp::new();
    let (cookie, view) = app.login().await;

    app.directory.remove_user(app.user.id);
    app.manager
        .mark_stale_user_sessions_before(app.user.id, app.clock.now())
        .await
        .unwrap();

    let response = app.me(&cookie).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.manager.retrieve_session(&session_id(&view)).await,
        Err(SessionError::SessionNotFound)
    );
}

#[tokio::test]
async fn test_directory_outage_during_refresh_is_unavailable() {
    let app = TestApp::new();
    let (cookie, _) = app.login().await;

    app.manager
        .mark_stale_user_sessions_before(app.user.id, app.clock.now())
        .await
        .unwrap();
    app.directory.set_unavailable(true);

    let response = app.me(&cookie).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Nothing was lost: once the directory is back the session refreshes
    app.directory.set_unavailable(false);
    app.clock.advance(Duration::seconds(1));
    assert_eq!(app.me(&cookie).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_everywhere_ends_other_devices() {
    let app = TestApp::new();
    let (laptop, _) = app.login().await;
    let (phone, _) = app.login().await;

    let response = app
        .send(post("/api/v1/session/logout-everywhere", &laptop))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(app.me(&phone).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.me(&laptop).await.status(), StatusCode::UNAUTHORIZED);

    // A later login works again
    app.clock.advance(Duration::seconds(1));
    let (fresh, _) = app.login().await;
    assert_eq!(app.me(&fresh).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_everywhere_requires_session() {
    let app = TestApp::new();
    let response = app
        .send(post("/api/v1/session/logout-everywhere", "theme=dark"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_records_activity() {
    let app = TestApp::new();
    let (cookie, view) = app.login().await;
    let id = session_id(&view);

    app.clock.advance(Duration::minutes(10));
    assert_eq!(app.me(&cookie).await.status(), StatusCode::OK);

    // The touch runs after the response; wait for it to land
    let expected = app.clock.now();
    let mut touched = false;
    for _ in 0..100 {
        let session = app.manager.retrieve_session(&id).await.unwrap();
        if session.last_activity_at == expected {
            touched = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(touched, "last_activity_at was not updated");
}

#[tokio::test]
async fn test_correlation_id_echoed() {
    let app = TestApp::new();

    let response = app
        .send(
            Request::get("/health")
                .header(CORRELATION_ID_HEADER, "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CORRELATION_ID_HEADER).unwrap(),
        "trace-42"
    );

    let response = app.me("sid=not-a-session").await;
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
}
