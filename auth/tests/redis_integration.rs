//! Redis backend integration tests.
//!
//! These need a running Redis and are ignored by default:
//!
//! ```sh
//! docker run --rm -p 6379:6379 redis:7
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p sessionward-auth --test redis_integration -- --ignored
//! ```
//!
//! Every test uses its own key namespace so runs do not interfere.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use sessionward_auth::mocks::user_snapshot;
use sessionward_auth::{
    KvBackend, KvError, KvWrite, RedisBackend, Role, SessionConfig, SessionError, SessionManager,
};
use sessionward_core::environment::SystemClock;
use std::sync::Arc;

async fn backend() -> RedisBackend {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisBackend::new(&url).await.expect("Redis is reachable")
}

fn namespace() -> String {
    format!("it-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_create_is_exclusive() {
    let store = backend().await;
    let key = format!("{}:exclusive", namespace());

    let write = || KvWrite::new(b"first".to_vec(), Some(Duration::seconds(30)));
    store.create(&key, write()).await.unwrap();
    assert_eq!(store.create(&key, write()).await, Err(KvError::AlreadyExists));

    store.delete(&key).await.unwrap();
    store.delete(&key).await.unwrap();
    assert_eq!(store.get(&key).await, Err(KvError::NotFound));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_conditional_set_requires_existing_key() {
    let store = backend().await;
    let key = format!("{}:xx", namespace());

    let write = KvWrite::new(b"v".to_vec(), Some(Duration::seconds(30)));
    assert_eq!(
        store.conditional_set(&key, write.clone()).await,
        Err(KvError::NotFound)
    );

    store.set(&key, write.clone()).await.unwrap();
    store.conditional_set(&key, write).await.unwrap();
    store.delete(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ttl_expires_keys() {
    let store = backend().await;
    let key = format!("{}:ttl", namespace());

    store
        .set(&key, KvWrite::new(b"v".to_vec(), Some(Duration::milliseconds(200))))
        .await
        .unwrap();
    assert!(store.get(&key).await.is_ok());

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert_eq!(store.get(&key).await, Err(KvError::NotFound));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_transaction_aborts_on_interleaved_write() {
    let store = backend().await;
    let key = format!("{}:watch", namespace());
    store
        .set(&key, KvWrite::new(b"0".to_vec(), Some(Duration::seconds(30))))
        .await
        .unwrap();

    // Someone else writes between our read and our commit
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let mut interloper = redis::Client::open(url).unwrap().get_connection().unwrap();
    let interloper_key = key.clone();
    let outcome = store
        .transact(&key, move |_current: &[u8]| -> Result<KvWrite, KvError> {
            let _: () = redis::cmd("SET")
                .arg(&interloper_key)
                .arg("other")
                .query(&mut interloper)
                .map_err(|e| KvError::Transport(e.to_string()))?;
            Ok(KvWrite::new(b"mine".to_vec(), Some(Duration::seconds(30))))
        })
        .await;

    assert_eq!(outcome, Err(KvError::Aborted));
    assert_eq!(store.get(&key).await.unwrap(), b"other".to_vec());
    store.delete(&key).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Redis"]
async fn test_session_manager_on_redis() {
    let clock = Arc::new(SystemClock);
    let manager = SessionManager::new(
        Arc::new(backend().await),
        clock,
        SessionConfig::default().with_key_namespace(namespace()),
    );

    let session = manager.start_session(user_snapshot("ada@example.com", Role::Member));
    manager
        .create_session(&session, Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(
        manager.create_session(&session, Duration::minutes(5)).await,
        Err(SessionError::SessionIdNotUnique)
    );

    let touches = (0..8).map(|_| {
        let manager = manager.clone();
        let id = session.id.clone();
        tokio::spawn(async move { manager.touch_session(&id).await })
    });
    for touch in futures::future::join_all(touches).await {
        touch.unwrap().unwrap();
    }

    manager.log_out_everywhere(session.user.id).await.unwrap();
    assert_eq!(
        manager.retrieve_session(&session.id).await,
        Err(SessionError::SessionNotFound)
    );
}
