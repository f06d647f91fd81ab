//! `HttpUserDirectory` against a fake account service served by Axum on a
//! local port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
};
use sessionward_auth::mocks::user_snapshot;
use sessionward_auth::{DirectoryError, Role, UserDirectory, UserId, UserSnapshot};
use sessionward_server::HttpUserDirectory;
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/accounts/")
}

fn fake_service(user: UserSnapshot) -> Router {
    let known = user.clone();
    let owner = user.id;
    Router::new()
        .route(
            "/accounts/users/:id",
            get(move |Path(id): Path<String>| {
                let known = known.clone();
                async move {
                    if id == known.id.to_string() {
                        Ok(Json(known))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }
            }),
        )
        .route(
            "/accounts/authenticate",
            post(move |Json(body): Json<serde_json::Value>| {
                let user = user.clone();
                async move {
                    if body["password"] == "hunter2" && body["email"] == user.email.as_str() {
                        Ok(Json(user))
                    } else {
                        Err(StatusCode::UNAUTHORIZED)
                    }
                }
            }),
        )
        .route(
            "/accounts/entitlements/:id/owner",
            get(move |Path(id): Path<String>| async move {
                match id.as_str() {
                    "ent 1" => Ok(Json(serde_json::json!({ "user_id": owner }))),
                    "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
                    _ => Err(StatusCode::NOT_FOUND),
                }
            }),
        )
}

#[tokio::test]
async fn test_directory_round_trips() {
    let user = user_snapshot("ada@example.com", Role::Admin);
    let base = serve(fake_service(user.clone())).await;
    let directory = HttpUserDirectory::new(&base, Duration::from_secs(2)).unwrap();

    assert_eq!(directory.find_user(user.id).await, Ok(user.clone()));
    assert_eq!(
        directory.find_user(UserId::new()).await,
        Err(DirectoryError::NotFound)
    );

    assert_eq!(
        directory.authenticate("ada@example.com", "hunter2").await,
        Ok(user.clone())
    );
    assert_eq!(
        directory.authenticate("ada@example.com", "wrong").await,
        Err(DirectoryError::InvalidCredentials)
    );

    // Path segments are percent-encoded
    assert_eq!(directory.owner_of_entitlement("ent 1").await, Ok(user.id));
    assert_eq!(
        directory.owner_of_entitlement("ent-2").await,
        Err(DirectoryError::NotFound)
    );
}

#[tokio::test]
async fn test_unexpected_status_is_unavailable() {
    let base = serve(fake_service(user_snapshot("ada@example.com", Role::Member))).await;
    let directory = HttpUserDirectory::new(&base, Duration::from_secs(2)).unwrap();

    let err = directory.owner_of_entitlement("broken").await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let directory =
        HttpUserDirectory::new(&format!("http://{addr}"), Duration::from_millis(500)).unwrap();
    let err = directory.find_user(UserId::new()).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable(_)));
}

#[test]
fn test_invalid_base_url_rejected() {
    assert!(HttpUserDirectory::new("not a url", Duration::from_secs(1)).is_err());
    assert!(HttpUserDirectory::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
}
