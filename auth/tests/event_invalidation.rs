//! Account events flowing through the invalidator into session reads.
//!
//! The invalidator runs as a background task subscribed to an in-memory
//! bus, exactly as it does in production against Redpanda.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use sessionward_auth::mocks::{InMemoryBackend, MockUserDirectory, user_snapshot};
use sessionward_auth::{
    AccountEvent, DEFAULT_ACCOUNT_EVENTS_TOPIC, Entitlement, InvalidatorConfig, Role, Session,
    SessionConfig, SessionError, SessionInvalidator, SessionManager, UserDirectory,
};
use sessionward_core::environment::Clock;
use sessionward_core::event::SerializedEvent;
use sessionward_core::event_bus::EventBus;
use sessionward_testing::{InMemoryEventBus, ManualClock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SETTLE: std::time::Duration = std::time::Duration::from_secs(5);

struct Harness {
    manager: SessionManager<InMemoryBackend>,
    backend: Arc<InMemoryBackend>,
    directory: Arc<MockUserDirectory>,
    bus: InMemoryEventBus,
    clock: Arc<ManualClock>,
    shutdown: broadcast::Sender<()>,
    invalidator: JoinHandle<()>,
    published: usize,
}

impl Harness {
    async fn start() -> Self {
        sessionward_testing::init_tracing();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(InMemoryBackend::new(clock.clone()));
        let manager = SessionManager::new(Arc::clone(&backend), clock.clone(), SessionConfig::default());
        let directory = Arc::new(MockUserDirectory::new());
        let bus = InMemoryEventBus::new();
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let invalidator = SessionInvalidator::new(
            manager.clone(),
            Arc::clone(&directory),
            Arc::new(bus.clone()),
            InvalidatorConfig::default().with_retry_delay(std::time::Duration::from_millis(10)),
        )
        .with_shutdown(shutdown_rx)
        .spawn();

        let started = async {
            while bus.subscriber_count() == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(SETTLE, started)
            .await
            .expect("invalidator subscribes");

        Self {
            manager,
            backend,
            directory,
            bus,
            clock,
            shutdown,
            invalidator,
            published: 0,
        }
    }

    async fn log_in(&self, email: &str) -> Session {
        let user = user_snapshot(email, Role::Member);
        self.directory.insert_user(user.clone(), "hunter2");
        let session = self.manager.start_session(user);
        self.manager
            .create_session(&session, self.manager.config().idle_timeout)
            .await
            .unwrap();
        session
    }

    /// Publish and wait until the invalidator has acked or dropped it.
    async fn deliver(&mut self, event: &AccountEvent) {
        let envelope = SerializedEvent::from_event(event, Some("corr-it".to_string())).unwrap();
        self.bus
            .publish(DEFAULT_ACCOUNT_EVENTS_TOPIC, "key", &envelope)
            .await
            .unwrap();
        self.published += 1;
        assert!(self.bus.wait_for_settled(self.published, SETTLE).await);
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        tokio::time::timeout(SETTLE, self.invalidator)
            .await
            .expect("invalidator stops on shutdown")
            .unwrap();
    }
}

#[tokio::test]
async fn test_profile_change_makes_session_stale_until_refreshed() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;
    let user_id = session.user.id;

    // Arrange: the profile changes in the system of record
    let mut renamed = session.user.clone();
    renamed.email = "ada@lovelace.dev".to_string();
    h.directory.update_user(renamed);

    // Act
    h.deliver(&AccountEvent::ProfileChanged { user_id }).await;
    assert_eq!(h.bus.acked(), 1);

    // Assert: the read reports stale and carries the old snapshot
    let stale = match h.manager.retrieve_session(&session.id).await {
        Err(SessionError::SessionStale(stale)) => stale,
        other => panic!("expected a stale session, got {other:?}"),
    };
    assert_eq!(stale.user.email, "ada@example.com");

    // The request path reloads the user and refreshes the session
    h.clock.advance(Duration::seconds(1));
    let fresh = h.directory.find_user(user_id).await.unwrap();
    h.manager.refresh_session(&session.id, fresh).await.unwrap();

    let loaded = h.manager.retrieve_session(&session.id).await.unwrap();
    assert_eq!(loaded.user.email, "ada@lovelace.dev");

    h.stop().await;
}

#[tokio::test]
async fn test_credential_change_logs_out_existing_sessions_only() {
    let mut h = Harness::start().await;
    let laptop = h.log_in("ada@example.com").await;
    let user_id = laptop.user.id;

    h.deliver(&AccountEvent::CredentialsChanged { user_id }).await;

    assert_eq!(
        h.manager.retrieve_session(&laptop.id).await,
        Err(SessionError::SessionNotFound)
    );

    // Logging in again afterwards works
    h.clock.advance(Duration::seconds(1));
    let phone = h.manager.start_session(laptop.user.clone());
    h.manager
        .create_session(&phone, Duration::hours(1))
        .await
        .unwrap();
    assert!(h.manager.retrieve_session(&phone.id).await.is_ok());

    h.stop().await;
}

#[tokio::test]
async fn test_entitlement_events_resolve_the_owner() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;
    h.directory.grant_entitlement(
        session.user.id,
        Entitlement {
            id: "ent-pro".to_string(),
            kind: "subscription:pro".to_string(),
            granted_at: h.clock.now(),
        },
    );

    h.deliver(&AccountEvent::EntitlementCreated {
        entitlement_id: "ent-pro".to_string(),
        user_id: None,
    })
    .await;

    assert!(matches!(
        h.manager.retrieve_session(&session.id).await,
        Err(SessionError::SessionStale(_))
    ));

    h.stop().await;
}

#[tokio::test]
async fn test_redelivered_events_are_harmless() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;
    let user_id = session.user.id;

    h.deliver(&AccountEvent::ProfileChanged { user_id }).await;
    h.clock.advance(Duration::seconds(1));
    let marker = h.manager.staleness_marker(user_id).await.unwrap();

    // An older copy arrives again after the clock moved on
    h.clock.advance(Duration::seconds(1));
    h.deliver(&AccountEvent::ProfileChanged { user_id }).await;

    let later = h.manager.staleness_marker(user_id).await.unwrap();
    assert!(later >= marker);
    assert_eq!(h.bus.acked(), 2);

    h.stop().await;
}

#[tokio::test]
async fn test_unrelated_events_are_acked_and_ignored() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;

    let foreign = SerializedEvent::new("InvoicePaid.v1".to_string(), vec![1, 2, 3], None);
    h.bus
        .publish(DEFAULT_ACCOUNT_EVENTS_TOPIC, "key", &foreign)
        .await
        .unwrap();
    h.published += 1;
    assert!(h.bus.wait_for_settled(h.published, SETTLE).await);

    assert_eq!(h.bus.acked(), 1);
    assert!(h.manager.retrieve_session(&session.id).await.is_ok());

    h.stop().await;
}

#[tokio::test]
async fn test_invalidator_resubscribes_after_stream_ends() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;

    h.bus.close_subscriptions();
    let resubscribed = async {
        while h.bus.subscriber_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(SETTLE, resubscribed)
        .await
        .expect("invalidator resubscribes");

    h.deliver(&AccountEvent::CredentialsChanged {
        user_id: session.user.id,
    })
    .await;
    assert_eq!(
        h.manager.retrieve_session(&session.id).await,
        Err(SessionError::SessionNotFound)
    );

    h.stop().await;
}

#[tokio::test]
async fn test_credential_change_survives_a_backend_outage() {
    let mut h = Harness::start().await;
    let session = h.log_in("ada@example.com").await;

    // Outlasts every in-place attempt of the first delivery
    h.backend.fail_next_transport(3);
    h.deliver(&AccountEvent::CredentialsChanged {
        user_id: session.user.id,
    })
    .await;
    assert_eq!(h.bus.unacked(), 1);

    // The invalidator drops the subscription and gets the event again
    h.published += 1;
    assert!(h.bus.wait_for_settled(h.published, SETTLE).await);
    assert_eq!(h.bus.acked(), 1);
    assert!(h.manager.invalidation_marker(session.user.id).await.unwrap().is_some());
    assert_eq!(
        h.manager.retrieve_session(&session.id).await,
        Err(SessionError::SessionNotFound)
    );

    h.stop().await;
}
