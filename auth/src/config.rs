//! Session manager and invalidator configuration.

use chrono::{DateTime, Duration, Utc};

/// How long an idle session survives without a touch.
pub const DEFAULT_IDLE_TIMEOUT_HOURS: i64 = 24;

/// Hard ceiling on a session's life.
pub const DEFAULT_ABSOLUTE_LIFETIME_DAYS: i64 = 30;

/// Attempts before an optimistic update gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Per-operation deadline when the caller supplies none.
pub const DEFAULT_OPERATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Session manager configuration.
///
/// # Example
///
/// ```
/// use sessionward_auth::config::SessionConfig;
/// use chrono::Duration;
///
/// let config = SessionConfig::new()
///     .with_idle_timeout(Duration::hours(2))
///     .with_key_namespace("shop");
/// assert_eq!(config.max_attempts, 10);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sliding TTL applied on create and on every write.
    pub idle_timeout: Duration,
    /// Distance from creation to `absolute_expiration`.
    pub absolute_lifetime: Duration,
    /// Attempts for the optimistic update loop.
    pub max_attempts: u32,
    /// Deadline applied to each operation unless the caller set one.
    pub operation_timeout: std::time::Duration,
    /// How per-user markers are written and expired.
    pub marker_policy: MarkerPolicy,
    /// Optional prefix shared by every key this manager touches.
    pub key_namespace: Option<String>,
}

impl SessionConfig {
    /// Configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the absolute lifetime.
    #[must_use]
    pub const fn with_absolute_lifetime(mut self, absolute_lifetime: Duration) -> Self {
        self.absolute_lifetime = absolute_lifetime;
        self
    }

    /// Set the optimistic attempt bound. Zero is bumped to one.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the default per-operation deadline.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the marker policy.
    #[must_use]
    pub const fn with_marker_policy(mut self, policy: MarkerPolicy) -> Self {
        self.marker_policy = policy;
        self
    }

    /// Prefix every key with `namespace`.
    #[must_use]
    pub fn with_key_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key_namespace = Some(namespace.into());
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::hours(DEFAULT_IDLE_TIMEOUT_HOURS),
            absolute_lifetime: Duration::days(DEFAULT_ABSOLUTE_LIFETIME_DAYS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            marker_policy: MarkerPolicy::default(),
            key_namespace: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Marker Policy
// ═══════════════════════════════════════════════════════════════════════

/// Expiry of per-user invalidation and staleness markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerTtl {
    /// Keep the marker until every session it could affect has aged out:
    /// `absolute_lifetime` past the later of the marker time and now.
    #[default]
    SessionLifetime,
    /// Never expire markers.
    Never,
}

/// How a marker write interacts with an existing marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerWrite {
    /// Keep the later of the stored and the new timestamp.
    ///
    /// Replaying an old event can never move a marker backwards.
    #[default]
    MonotonicMax,
    /// Last writer wins.
    Overwrite,
}

/// Marker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkerPolicy {
    /// Expiry.
    pub ttl: MarkerTtl,
    /// Write semantics.
    pub write: MarkerWrite,
}

impl MarkerPolicy {
    /// TTL for a marker at `at`, written at `now`. `None` means no expiry.
    #[must_use]
    pub fn ttl_for(
        &self,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        absolute_lifetime: Duration,
    ) -> Option<Duration> {
        match self.ttl {
            MarkerTtl::Never => None,
            MarkerTtl::SessionLifetime => {
                let ahead = (at - now).max(Duration::zero());
                Some(absolute_lifetime + ahead)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Invalidator
// ═══════════════════════════════════════════════════════════════════════

/// Default topic carrying account domain events.
pub const DEFAULT_ACCOUNT_EVENTS_TOPIC: &str = "account-events";

/// Configuration for [`crate::invalidator::SessionInvalidator`].
#[derive(Debug, Clone)]
pub struct InvalidatorConfig {
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Events processed concurrently.
    pub max_in_flight: usize,
    /// Pause before resubscribing after the stream fails or ends.
    pub retry_delay: std::time::Duration,
}

impl InvalidatorConfig {
    /// Configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the topic list.
    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set the concurrency bound. Zero is bumped to one.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Set the resubscribe delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        Self {
            topics: vec![DEFAULT_ACCOUNT_EVENTS_TOPIC.to_string()],
            max_in_flight: 16,
            retry_delay: std::time::Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout, Duration::hours(24));
        assert_eq!(config.absolute_lifetime, Duration::days(30));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.marker_policy.write, MarkerWrite::MonotonicMax);
        assert!(config.key_namespace.is_none());
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(SessionConfig::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn marker_ttl_covers_future_markers() {
        let now = Utc::now();
        let policy = MarkerPolicy::default();
        let lifetime = Duration::days(30);

        assert_eq!(policy.ttl_for(now, now, lifetime), Some(lifetime));
        assert_eq!(
            policy.ttl_for(now - Duration::days(1), now, lifetime),
            Some(lifetime)
        );
        assert_eq!(
            policy.ttl_for(now + Duration::hours(1), now, lifetime),
            Some(lifetime + Duration::hours(1))
        );
    }

    #[test]
    fn markers_can_live_forever() {
        let policy = MarkerPolicy {
            ttl: MarkerTtl::Never,
            write: MarkerWrite::Overwrite,
        };
        assert_eq!(policy.ttl_for(Utc::now(), Utc::now(), Duration::days(1)), None);
    }

    #[test]
    fn invalidator_defaults() {
        let config = InvalidatorConfig::new().with_max_in_flight(0);
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.topics, vec!["account-events".to_string()]);
    }
}
