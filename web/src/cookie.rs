//! Session cookie transport.
//!
//! The session id travels in a single cookie. This module reads it back from
//! `Cookie` headers and renders the `Set-Cookie` values that issue or clear it.

use axum::http::{HeaderMap, HeaderValue, header};
use sessionward_auth::SessionId;

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    /// Never sent on cross-site requests.
    Strict,
    /// Sent on top-level cross-site navigations.
    #[default]
    Lax,
    /// Always sent. Requires `Secure`.
    None,
}

impl SameSite {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

impl std::str::FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            other => Err(format!("unknown SameSite policy: {other}")),
        }
    }
}

/// How the session cookie is named and scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieConfig {
    /// Cookie name.
    pub name: String,
    /// `Domain` attribute; host-only when `None`.
    pub domain: Option<String>,
    /// `Path` attribute.
    pub path: String,
    /// `Secure` attribute. Always set when `same_site` is [`SameSite::None`].
    pub secure: bool,
    /// `HttpOnly` attribute.
    pub http_only: bool,
    /// `SameSite` attribute.
    pub same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "sid".to_string(),
            domain: None,
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieConfig {
    /// Set the cookie name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the `Domain` attribute.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the `Secure` attribute.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `SameSite` attribute.
    #[must_use]
    pub const fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// The session id carried by the request, if any.
    ///
    /// Looks at every `Cookie` header. A value that is not a well-formed
    /// session id is treated as absent.
    #[must_use]
    pub fn session_id(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .and_then(|(_, value)| SessionId::parse(value.trim_matches('"')))
    }

    /// `Set-Cookie` value that issues `id` for `max_age`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured name or domain is not a valid header value.
    pub fn issue(
        &self,
        id: &SessionId,
        max_age: chrono::Duration,
    ) -> Result<HeaderValue, header::InvalidHeaderValue> {
        HeaderValue::from_str(&self.render(id.as_str(), max_age.num_seconds().max(0)))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured name or domain is not a valid header value.
    pub fn removal(&self) -> Result<HeaderValue, header::InvalidHeaderValue> {
        HeaderValue::from_str(&self.render("", 0))
    }

    fn render(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={value}; Path={}; Max-Age={max_age}",
            self.name, self.path
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        cookie
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_session_among_other_cookies() {
        let id = SessionId::generate();
        let config = CookieConfig::default();
        let found = config.session_id(&headers(&format!("theme=dark; sid={id}; lang=en")));
        assert_eq!(found, Some(id));
    }

    #[test]
    fn malformed_ids_are_ignored() {
        let config = CookieConfig::default();
        assert_eq!(config.session_id(&headers("sid=short")), None);
        assert_eq!(config.session_id(&headers("sid=")), None);
        assert_eq!(config.session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn issued_cookie_carries_attributes() {
        let id = SessionId::generate();
        let config = CookieConfig::default().with_domain("example.com");
        let cookie = config.issue(&id, chrono::Duration::hours(1)).unwrap();
        let cookie = cookie.to_str().unwrap();

        assert!(cookie.starts_with(&format!("sid={id}; Path=/; Max-Age=3600")));
        assert!(cookie.contains("; Domain=example.com"));
        assert!(cookie.contains("; HttpOnly"));
        assert!(cookie.contains("; Secure"));
        assert!(cookie.ends_with("; SameSite=Lax"));
    }

    #[test]
    fn same_site_none_forces_secure() {
        let config = CookieConfig::default()
            .with_secure(false)
            .with_same_site(SameSite::None);
        let cookie = config.removal().unwrap();
        assert!(cookie.to_str().unwrap().contains("; Secure"));

        let lax = CookieConfig::default().with_secure(false);
        assert!(!lax.removal().unwrap().to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn removal_expires_immediately() {
        let cookie = CookieConfig::default().removal().unwrap();
        assert!(cookie.to_str().unwrap().starts_with("sid=; Path=/; Max-Age=0"));
    }

    #[test]
    fn same_site_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<SameSite>(), Ok(SameSite::Strict));
        assert!("sometimes".parse::<SameSite>().is_err());
    }
}
