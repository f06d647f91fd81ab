//! Configuration management for the session server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is read first, if present.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SERVER_HOST` | `0.0.0.0` |
//! | `SERVER_PORT` | `8080` |
//! | `METRICS_PORT` | `9090` |
//! | `REDIS_URL` | `redis://127.0.0.1:6379` |
//! | `REDPANDA_BROKERS` | `localhost:9092` |
//! | `REDPANDA_CONSUMER_GROUP` | derived from the topics |
//! | `ACCOUNT_EVENTS_TOPIC` | `account-events` |
//! | `INVALIDATOR_MAX_IN_FLIGHT` | `16` |
//! | `USER_DIRECTORY_URL` | `http://localhost:8081` |
//! | `USER_DIRECTORY_TIMEOUT_MS` | `2000` |
//! | `SESSION_IDLE_TIMEOUT_SECS` | see `SessionConfig` |
//! | `SESSION_ABSOLUTE_LIFETIME_SECS` | see `SessionConfig` |
//! | `SESSION_MAX_ATTEMPTS` | `10` |
//! | `SESSION_OPERATION_TIMEOUT_MS` | see `SessionConfig` |
//! | `SESSION_KEY_NAMESPACE` | none |
//! | `SESSION_COOKIE_NAME` | `sid` |
//! | `SESSION_COOKIE_DOMAIN` | host-only |
//! | `SESSION_COOKIE_SECURE` | `true` |
//! | `SESSION_COOKIE_SAMESITE` | `lax` |

use sessionward_auth::{DEFAULT_ACCOUNT_EVENTS_TOPIC, InvalidatorConfig, SessionConfig};
use sessionward_web::{CookieConfig, SameSite};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A variable was set to something unusable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    /// Variable name.
    pub var: &'static str,
    /// Raw value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

/// Everything the server binary needs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// HTTP port.
    pub port: u16,
    /// Prometheus scrape port.
    pub metrics_port: u16,
    /// Redis connection URL.
    pub redis_url: String,
    /// Broker addresses (comma-separated).
    pub redpanda_brokers: String,
    /// Consumer group; derived from the topics when unset.
    pub consumer_group: Option<String>,
    /// Base URL of the user directory service.
    pub user_directory_url: String,
    /// Per-call timeout for the user directory.
    pub user_directory_timeout: Duration,
    /// Session manager settings.
    pub session: SessionConfig,
    /// Session cookie settings.
    pub cookies: CookieConfig,
    /// Invalidator settings.
    pub invalidator: InvalidatorConfig,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let mut session = SessionConfig::default();
        if let Some(secs) = env.parse::<i64>("SESSION_IDLE_TIMEOUT_SECS")? {
            session = session.with_idle_timeout(lifetime("SESSION_IDLE_TIMEOUT_SECS", secs)?);
        }
        if let Some(secs) = env.parse::<i64>("SESSION_ABSOLUTE_LIFETIME_SECS")? {
            session = session
                .with_absolute_lifetime(lifetime("SESSION_ABSOLUTE_LIFETIME_SECS", secs)?);
        }
        if let Some(attempts) = env.parse::<u32>("SESSION_MAX_ATTEMPTS")? {
            session = session.with_max_attempts(attempts);
        }
        if let Some(ms) = env.parse::<u64>("SESSION_OPERATION_TIMEOUT_MS")? {
            session = session.with_operation_timeout(Duration::from_millis(ms));
        }
        if let Some(namespace) = env.string("SESSION_KEY_NAMESPACE") {
            session = session.with_key_namespace(namespace);
        }

        let mut cookies = CookieConfig::default();
        if let Some(name) = env.string("SESSION_COOKIE_NAME") {
            cookies = cookies.with_name(name);
        }
        if let Some(domain) = env.string("SESSION_COOKIE_DOMAIN") {
            cookies = cookies.with_domain(domain);
        }
        if let Some(secure) = env.parse::<bool>("SESSION_COOKIE_SECURE")? {
            cookies = cookies.with_secure(secure);
        }
        if let Some(same_site) = env.parse::<SameSite>("SESSION_COOKIE_SAMESITE")? {
            cookies = cookies.with_same_site(same_site);
        }

        let topic = env
            .string("ACCOUNT_EVENTS_TOPIC")
            .unwrap_or_else(|| DEFAULT_ACCOUNT_EVENTS_TOPIC.to_string());
        let mut invalidator = InvalidatorConfig::default().with_topics([topic]);
        if let Some(max_in_flight) = env.parse::<usize>("INVALIDATOR_MAX_IN_FLIGHT")? {
            invalidator = invalidator.with_max_in_flight(max_in_flight);
        }

        Ok(Self {
            host: env
                .string("SERVER_HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("SERVER_PORT")?.unwrap_or(8080),
            metrics_port: env.parse("METRICS_PORT")?.unwrap_or(9090),
            redis_url: env
                .string("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            redpanda_brokers: env
                .string("REDPANDA_BROKERS")
                .unwrap_or_else(|| "localhost:9092".to_string()),
            consumer_group: env.string("REDPANDA_CONSUMER_GROUP"),
            user_directory_url: env
                .string("USER_DIRECTORY_URL")
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            user_directory_timeout: Duration::from_millis(
                env.parse("USER_DIRECTORY_TIMEOUT_MS")?.unwrap_or(2000),
            ),
            session,
            cookies,
            invalidator,
        })
    }

    /// `host:port` for the HTTP listener.
    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` for the metrics listener.
    #[must_use]
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port)
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and non-blank.
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(var)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

/// Longest accepted session lifetime, so expiry timestamps stay representable.
const MAX_LIFETIME_DAYS: i64 = 365 * 100;

fn lifetime(var: &'static str, secs: i64) -> Result<chrono::Duration, ConfigError> {
    let reject = |reason: &str| ConfigError {
        var,
        value: secs.to_string(),
        reason: reason.to_string(),
    };

    if secs <= 0 {
        return Err(reject("must be positive"));
    }
    chrono::Duration::try_seconds(secs)
        .filter(|duration| *duration <= chrono::Duration::days(MAX_LIFETIME_DAYS))
        .ok_or_else(|| reject("must be at most 100 years"))
}
