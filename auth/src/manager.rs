//! Session manager.
//!
//! Owns the session lifecycle on top of a [`KvBackend`]:
//!
//! ```text
//! Created ──▶ { Touched | Refreshed }* ──▶ LoggedOut | Invalidated | Expired
//! ```
//!
//! `Invalidated` and `Stale` are never stored on the session itself. Each
//! user has up to two marker timestamps, and a read compares the session's
//! `created_at` / `refreshed_at` against them. Revoking every session of a
//! user is therefore one marker write, however many sessions the user has.
//!
//! Touch and update use an optimistic read-modify-write transaction on the
//! session key, retried on conflict (see [`with_optimistic_retry`]).
//!
//! # Deadlines
//!
//! Every operation runs under a deadline. By default it is
//! `SessionConfig::operation_timeout` from the start of the call;
//! [`SessionManager::with_deadline`] replaces it with a caller-supplied
//! instant. A missed deadline surfaces as [`SessionError::Timeout`], which is
//! distinct from [`SessionError::MaxAttemptsReached`].

use crate::codec;
use crate::config::{MarkerWrite, SessionConfig};
use crate::error::{Result, SessionError};
use crate::keys::KeySpace;
use crate::providers::{KvBackend, KvError, KvWrite};
use crate::retry::with_optimistic_retry;
use crate::state::{Session, SessionId, UserId, UserSnapshot};
use chrono::{DateTime, Duration, Utc};
use sessionward_core::environment::Clock;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Session manager.
///
/// Cheap to clone; clones share the backend, clock and configuration.
pub struct SessionManager<B> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    config: Arc<SessionConfig>,
    keys: KeySpace,
    deadline: Option<Instant>,
}

impl<B> Clone for SessionManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
            keys: self.keys.clone(),
            deadline: self.deadline,
        }
    }
}

impl<B: KvBackend + 'static> SessionManager<B> {
    /// Create a manager over `backend`.
    #[must_use]
    pub fn new(backend: Arc<B>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let keys = KeySpace::new(config.key_namespace.as_deref());
        Self {
            backend,
            clock,
            config: Arc::new(config),
            keys,
            deadline: None,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The key layout in use.
    #[must_use]
    pub const fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A handle whose operations all share one absolute deadline.
    ///
    /// In-flight backend calls and retry loops are abandoned once it passes.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Build (but do not store) a new session for `user`, starting now.
    #[must_use]
    pub fn start_session(&self, user: UserSnapshot) -> Session {
        Session::new(
            SessionId::generate(),
            user,
            self.clock.now(),
            self.config.absolute_lifetime,
        )
    }

    // ═══════════════════════════════════════════════════════════════════
    // Session Operations
    // ═══════════════════════════════════════════════════════════════════

    /// Store a new session with a TTL of `ttl`, capped by its absolute expiration.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionIdNotUnique`] if the id is already taken
    /// - [`SessionError::Timeout`], [`SessionError::Backend`] on infrastructure failure
    pub async fn create_session(&self, session: &Session, ttl: Duration) -> Result<()> {
        let key = self.keys.session(&session.id);
        let now = self.clock.now();
        let ttl = ttl.min(session.remaining_lifetime(now));
        let write = KvWrite::new(codec::encode_session(session)?, Some(ttl));

        match self.bounded(async { Ok(self.backend.create(&key, write).await?) }).await {
            Ok(()) => {}
            Err(SessionError::Backend(KvError::AlreadyExists)) => {
                tracing::warn!(session_id = %session.id, "Session ID collision on create");
                return Err(SessionError::SessionIdNotUnique);
            }
            Err(e) => return Err(e),
        }

        metrics::counter!("sessions_created_total").increment(1);
        tracing::info!(
            session_id = %session.id,
            user_id = %session.user.id,
            ttl_seconds = ttl.num_seconds(),
            "Created session"
        );

        Ok(())
    }

    /// Read a session and check it against the user's markers.
    ///
    /// - no record, or past its absolute expiration: `SessionNotFound`
    /// - invalidation marker at or after `created_at`: the record is deleted
    ///   (best effort) and `SessionNotFound` is returned
    /// - staleness marker at or after `refreshed_at`: `SessionStale` carrying
    ///   the session
    ///
    /// A missing marker always passes.
    ///
    /// # Errors
    ///
    /// The outcomes above, plus [`SessionError::Codec`], [`SessionError::Timeout`]
    /// and [`SessionError::Backend`].
    pub async fn retrieve_session(&self, id: &SessionId) -> Result<Session> {
        self.bounded(self.read_checked(id)).await
    }

    /// Record activity: bump `last_activity_at` and renew the TTL.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`] if the session is gone or expired
    /// - [`SessionError::MaxAttemptsReached`] under sustained contention
    /// - [`SessionError::Timeout`], [`SessionError::Backend`] on infrastructure failure
    pub async fn touch_session(&self, id: &SessionId) -> Result<Session> {
        self.modify(id, |session, now| {
            session.touch(now);
            Ok(())
        })
        .await
    }

    /// Apply `mutate` to a session inside the optimistic update protocol.
    ///
    /// `mutate` may run more than once if other writers interfere. The TTL is
    /// renewed on commit.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ImmutableField`] if `mutate` changes `id` or `created_at`
    /// - everything [`SessionManager::touch_session`] can return
    pub async fn update_session<F>(&self, id: &SessionId, mutate: F) -> Result<Session>
    where
        F: Fn(&mut Session) + Send + Sync,
    {
        self.modify(id, |session, _| {
            mutate(session);
            Ok(())
        })
        .await
    }

    /// Replace the session's user snapshot and set `refreshed_at` to now.
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::update_session`].
    pub async fn refresh_session(&self, id: &SessionId, user: UserSnapshot) -> Result<Session> {
        let refreshed = self
            .modify(id, |session, now| {
                session.refresh(user.clone(), now);
                Ok(())
            })
            .await?;

        tracing::debug!(
            session_id = %id,
            user_id = %refreshed.user.id,
            "Refreshed session user data"
        );

        Ok(refreshed)
    }

    /// Delete a session. Deleting a missing session succeeds.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`], [`SessionError::Backend`] on infrastructure failure.
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        let key = self.keys.session(id);
        self.bounded(async { Ok(self.backend.delete(&key).await?) })
            .await?;

        tracing::info!(session_id = %id, "Deleted session");

        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Markers
    // ═══════════════════════════════════════════════════════════════════

    /// Make every session of `user` created at or before `at` unreadable.
    ///
    /// # Errors
    ///
    /// [`SessionError::MaxAttemptsReached`], [`SessionError::Timeout`],
    /// [`SessionError::Backend`].
    pub async fn invalidate_user_sessions_before(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        let key = self.keys.invalidation(&user);
        self.write_marker(&key, at).await?;

        tracing::info!(user_id = %user, before = %at, "Invalidated user sessions");

        Ok(())
    }

    /// Flag every session of `user` refreshed at or before `at` as stale.
    ///
    /// # Errors
    ///
    /// [`SessionError::MaxAttemptsReached`], [`SessionError::Timeout`],
    /// [`SessionError::Backend`].
    pub async fn mark_stale_user_sessions_before(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        let key = self.keys.staleness(&user);
        self.write_marker(&key, at).await?;

        tracing::info!(user_id = %user, before = %at, "Marked user sessions stale");

        Ok(())
    }

    /// Invalidate every current session of `user`.
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::invalidate_user_sessions_before`].
    pub async fn log_out_everywhere(&self, user: UserId) -> Result<()> {
        self.invalidate_user_sessions_before(user, self.clock.now())
            .await
    }

    /// Current invalidation marker of `user`, if any.
    ///
    /// # Errors
    ///
    /// [`SessionError::Codec`], [`SessionError::Timeout`], [`SessionError::Backend`].
    pub async fn invalidation_marker(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let key = self.keys.invalidation(&user);
        self.bounded(self.read_marker(&key)).await
    }

    /// Current staleness marker of `user`, if any.
    ///
    /// # Errors
    ///
    /// [`SessionError::Codec`], [`SessionError::Timeout`], [`SessionError::Backend`].
    pub async fn staleness_marker(&self, user: UserId) -> Result<Option<DateTime<Utc>>> {
        let key = self.keys.staleness(&user);
        self.bounded(self.read_marker(&key)).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.operation_timeout);

        if let Ok(outcome) = tokio::time::timeout_at(deadline, operation).await {
            outcome
        } else {
            tracing::warn!("Session operation exceeded its deadline");
            Err(SessionError::Timeout)
        }
    }

    /// TTL for a session written at `now`.
    fn record_ttl(&self, session: &Session, now: DateTime<Utc>) -> Duration {
        self.config
            .idle_timeout
            .min(session.remaining_lifetime(now))
    }

    async fn read_checked(&self, id: &SessionId) -> Result<Session> {
        let key = self.keys.session(id);

        let bytes = match self.backend.get(&key).await {
            Ok(bytes) => bytes,
            Err(KvError::NotFound) => {
                tracing::debug!(session_id = %id, "Session not found");
                return Err(SessionError::SessionNotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let session = codec::decode_session(&bytes)?;

        if session.is_expired_at(self.clock.now()) {
            tracing::debug!(session_id = %id, "Session past absolute expiration");
            self.discard(key);
            return Err(SessionError::SessionNotFound);
        }

        let user = session.user.id;
        let (invalid_key, stale_key) = (self.keys.invalidation(&user), self.keys.staleness(&user));
        let (invalid_before, stale_before) = tokio::try_join!(
            self.read_marker(&invalid_key),
            self.read_marker(&stale_key),
        )?;

        if invalid_before.is_some_and(|marker| marker >= session.created_at) {
            metrics::counter!("sessions_invalidated_reads_total").increment(1);
            tracing::debug!(session_id = %id, user_id = %user, "Session invalidated");
            self.discard(key);
            return Err(SessionError::SessionNotFound);
        }

        if stale_before.is_some_and(|marker| marker >= session.refreshed_at) {
            metrics::counter!("sessions_stale_reads_total").increment(1);
            tracing::debug!(session_id = %id, user_id = %user, "Session user data is stale");
            return Err(SessionError::SessionStale(Box::new(session)));
        }

        Ok(session)
    }

    async fn read_marker(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.backend.get(key).await {
            Ok(bytes) => codec::decode_marker(&bytes).map(Some),
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete on the read path, detached from the caller's
    /// deadline. Failure is logged, never returned.
    fn discard(&self, key: String) {
        let backend = Arc::clone(&self.backend);
        let timeout = self.config.operation_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, backend.delete(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Failed to delete dead session");
                }
                Err(_) => tracing::warn!(key = %key, "Deleting dead session timed out"),
            }
        });
    }

    async fn modify<F>(&self, id: &SessionId, mutate: F) -> Result<Session>
    where
        F: Fn(&mut Session, DateTime<Utc>) -> Result<()> + Send + Sync,
    {
        let key = self.keys.session(id);
        let key = key.as_str();
        let mutate = &mutate;

        let committed = self
            .bounded(with_optimistic_retry(key, self.config.max_attempts, || async move {
                let now = self.clock.now();
                self.backend
                    .transact(key, |current: &[u8]| -> Result<KvWrite> {
                        let mut session = codec::decode_session(current)?;
                        if session.is_expired_at(now) {
                            return Err(SessionError::SessionNotFound);
                        }

                        let (original_id, created_at) = (session.id.clone(), session.created_at);
                        mutate(&mut session, now)?;
                        if session.id != original_id {
                            return Err(SessionError::ImmutableField { field: "id" });
                        }
                        if session.created_at != created_at {
                            return Err(SessionError::ImmutableField { field: "created_at" });
                        }

                        let ttl = self.record_ttl(&session, now);
                        Ok(KvWrite::new(codec::encode_session(&session)?, Some(ttl)))
                    })
                    .await
            }))
            .await;

        match committed {
            Ok(bytes) => codec::decode_session(&bytes),
            Err(SessionError::Backend(KvError::NotFound)) => {
                tracing::debug!(session_id = %id, "Session vanished before update");
                Err(SessionError::SessionNotFound)
            }
            Err(SessionError::SessionNotFound) => {
                tracing::debug!(session_id = %id, "Session past absolute expiration");
                self.discard(key.to_string());
                Err(SessionError::SessionNotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_marker(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let policy = self.config.marker_policy;
        let lifetime = self.config.absolute_lifetime;
        let ttl_for = |marker: DateTime<Utc>| policy.ttl_for(marker, self.clock.now(), lifetime);
        let ttl_for = &ttl_for;
        let encoded = codec::encode_marker(at)?;
        let encoded = encoded.as_slice();

        match policy.write {
            MarkerWrite::Overwrite => {
                self.bounded(async {
                    let write = KvWrite::new(encoded.to_vec(), ttl_for(at));
                    Ok(self.backend.set(key, write).await?)
                })
                .await
            }
            MarkerWrite::MonotonicMax => {
                self.bounded(with_optimistic_retry(key, self.config.max_attempts, || async move {
                    let write = KvWrite::new(encoded.to_vec(), ttl_for(at));
                    match self.backend.create(key, write).await {
                        Ok(()) => return Ok(()),
                        Err(KvError::AlreadyExists) => {}
                        Err(e) => return Err(e.into()),
                    }

                    let merged = self
                        .backend
                        .transact(key, |current: &[u8]| -> Result<KvWrite> {
                            let latest = match codec::decode_marker(current) {
                                Ok(existing) => existing.max(at),
                                Err(e) => {
                                    tracing::warn!(key = %key, error = %e, "Replacing undecodable marker");
                                    at
                                }
                            };
                            Ok(KvWrite::new(codec::encode_marker(latest)?, ttl_for(latest)))
                        })
                        .await;

                    match merged {
                        Ok(_) => Ok(()),
                        // Expired between the create and the watch: start over.
                        Err(SessionError::Backend(KvError::NotFound)) => Err(KvError::Aborted.into()),
                        Err(e) => Err(e),
                    }
                }))
                .await
            }
        }
    }
}
