//! User directory over HTTP.
//!
//! Talks to the account service that owns users and entitlements:
//!
//! - `GET  {base}/users/{user_id}` → user snapshot, 404 if unknown
//! - `POST {base}/authenticate` with `{"email", "password"}` → user snapshot, 401 on bad credentials
//! - `GET  {base}/entitlements/{id}/owner` → `{"user_id": "..."}`, 404 if unknown
//!
//! Any other status, a timeout or a connection failure is reported as
//! [`DirectoryError::Unavailable`].

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sessionward_auth::{DirectoryError, UserDirectory, UserId, UserSnapshot};
use std::time::Duration;

/// [`UserDirectory`] backed by the account service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: Url,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct Owner {
    user_id: UserId,
}

impl HttpUserDirectory {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] if `base_url` is not an
    /// absolute HTTP URL or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| DirectoryError::Unavailable(format!("Invalid directory URL: {base_url}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
        rejected: StatusCode,
        rejection: DirectoryError,
    ) -> Result<T, DirectoryError> {
        let response = request.send().await.map_err(unavailable)?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(unavailable),
            status if status == rejected => Err(rejection),
            status => {
                tracing::warn!(%status, "User directory returned an unexpected status");
                Err(DirectoryError::Unavailable(format!(
                    "User directory returned {status}"
                )))
            }
        }
    }
}

fn unavailable(e: reqwest::Error) -> DirectoryError {
    DirectoryError::Unavailable(e.to_string())
}

impl UserDirectory for HttpUserDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<UserSnapshot, DirectoryError> {
        Self::read(
            self.client.get(self.url(&["users", &user_id.to_string()])),
            StatusCode::NOT_FOUND,
            DirectoryError::NotFound,
        )
        .await
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserSnapshot, DirectoryError> {
        Self::read(
            self.client
                .post(self.url(&["authenticate"]))
                .json(&Credentials { email, password }),
            StatusCode::UNAUTHORIZED,
            DirectoryError::InvalidCredentials,
        )
        .await
    }

    async fn owner_of_entitlement(&self, entitlement_id: &str) -> Result<UserId, DirectoryError> {
        let owner: Owner = Self::read(
            self.client
                .get(self.url(&["entitlements", entitlement_id, "owner"])),
            StatusCode::NOT_FOUND,
            DirectoryError::NotFound,
        )
        .await?;
        Ok(owner.user_id)
    }
}
