//! In-memory key-value backend for testing.

use crate::providers::{KvBackend, KvError, KvWrite};
use chrono::{DateTime, Duration, Utc};
use sessionward_core::environment::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_version: u64,
    transport_failures: usize,
    forced_aborts: usize,
    failing_deletes: bool,
    delete_delay: Option<std::time::Duration>,
    aborted: u64,
}

impl Inner {
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn store(&mut self, key: &str, write: KvWrite, now: DateTime<Utc>) {
        self.next_version += 1;
        let expires_at = write
            .ttl
            .map(|ttl| now + ttl.max(Duration::milliseconds(1)));
        self.entries.insert(
            key.to_string(),
            Entry {
                value: write.value,
                version: self.next_version,
                expires_at,
            },
        );
    }

    fn injected_failure(&mut self) -> Result<(), KvError> {
        if self.transport_failures > 0 {
            self.transport_failures -= 1;
            return Err(KvError::Transport("injected transport failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory [`KvBackend`].
///
/// Behaves like the Redis backend where it matters for tests:
/// - TTLs follow the injected clock, so tests can expire keys by advancing it
/// - `transact` reads a version, runs the callback without holding the lock,
///   yields, then commits only if the version is unchanged
/// - a key deleted between read and commit aborts the transaction
///
/// Fault injection covers transport failures, forced aborts and latency.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    latency: Option<std::time::Duration>,
}

impl InMemoryBackend {
    /// Create an empty backend driven by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
            latency: None,
        }
    }

    /// Delay every operation by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `count` operations fail with [`KvError::Transport`].
    pub fn fail_next_transport(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.transport_failures = count;
        }
    }

    /// Make the next `count` transaction commits fail with [`KvError::Aborted`].
    pub fn abort_next_transactions(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.forced_aborts = count;
        }
    }

    /// Make every delete fail with [`KvError::Transport`] until switched off.
    pub fn fail_deletes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_deletes = fail;
        }
    }

    /// Delay every delete by `delay`, on top of any general latency.
    pub fn delay_deletes(&self, delay: Option<std::time::Duration>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.delete_delay = delay;
        }
    }

    /// Whether a live value exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .is_ok_and(|mut inner| inner.live(key, now).is_some())
    }

    /// Remaining TTL of `key`. `None` if absent or stored without expiry.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().ok()?;
        inner.live(key, now)?.expires_at.map(|at| at - now)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().map_or(0, |inner| {
            inner.entries.values().filter(|e| e.is_live(now)).count()
        })
    }

    /// Whether no live keys exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transactions that failed to commit because of a concurrent write.
    #[must_use]
    pub fn aborted_transactions(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.aborted)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, KvError> {
        self.inner
            .lock()
            .map_err(|_| KvError::Transport("Mutex lock failed".to_string()))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read_versioned(&self, key: &str) -> Result<(Vec<u8>, u64), KvError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.injected_failure()?;
        inner
            .live(key, now)
            .map(|e| (e.value.clone(), e.version))
            .ok_or(KvError::NotFound)
    }

    fn commit_if_unchanged(&self, key: &str, version: u64, write: KvWrite) -> Result<Vec<u8>, KvError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let unchanged = inner.live(key, now).is_some_and(|e| e.version == version);
        if inner.forced_aborts > 0 || !unchanged {
            inner.forced_aborts = inner.forced_aborts.saturating_sub(1);
            inner.aborted += 1;
            return Err(KvError::Aborted);
        }

        let value = write.value.clone();
        inner.store(key, write, now);
        Ok(value)
    }
}

impl KvBackend for InMemoryBackend {
    async fn create(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        self.pause().await;
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.injected_failure()?;

        if inner.live(key, now).is_some() {
            return Err(KvError::AlreadyExists);
        }
        inner.store(key, write, now);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        self.pause().await;
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.injected_failure()?;

        inner
            .live(key, now)
            .map(|e| e.value.clone())
            .ok_or(KvError::NotFound)
    }

    async fn conditional_set(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        self.pause().await;
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.injected_failure()?;

        if inner.live(key, now).is_none() {
            return Err(KvError::NotFound);
        }
        inner.store(key, write, now);
        Ok(())
    }

    async fn set(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        self.pause().await;
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.injected_failure()?;

        inner.store(key, write, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.pause().await;
        let delay = self.lock()?.delete_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock()?;
        inner.injected_failure()?;
        if inner.failing_deletes {
            return Err(KvError::Transport("injected delete failure".to_string()));
        }

        inner.entries.remove(key);
        Ok(())
    }

    async fn transact<F, E>(&self, key: &str, f: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce(&[u8]) -> Result<KvWrite, E> + Send,
        E: From<KvError> + Send,
    {
        self.pause().await;
        let (current, version) = self.read_versioned(key)?;

        let write = f(&current)?;

        // Let concurrent transactions interleave between read and commit.
        tokio::task::yield_now().await;

        Ok(self.commit_if_unchanged(key, version, write)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sessionward_testing::ManualClock;

    fn backend() -> (InMemoryBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (InMemoryBackend::new(clock.clone()), clock)
    }

    fn write(value: &[u8], ttl: Option<Duration>) -> KvWrite {
        KvWrite::new(value.to_vec(), ttl)
    }

    #[tokio::test]
    async fn create_refuses_existing_key() {
        let (kv, _) = backend();
        kv.create("k", write(b"a", None)).await.unwrap();
        assert_eq!(
            kv.create("k", write(b"b", None)).await,
            Err(KvError::AlreadyExists)
        );
        assert_eq!(kv.get("k").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn conditional_set_requires_existing_key() {
        let (kv, _) = backend();
        assert_eq!(
            kv.conditional_set("k", write(b"a", None)).await,
            Err(KvError::NotFound)
        );
        kv.set("k", write(b"a", None)).await.unwrap();
        kv.conditional_set("k", write(b"b", None)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn keys_expire_with_the_clock() {
        let (kv, clock) = backend();
        kv.create("k", write(b"a", Some(Duration::seconds(10)))).await.unwrap();
        assert_eq!(kv.ttl("k"), Some(Duration::seconds(10)));

        clock.advance(Duration::seconds(10));
        assert_eq!(kv.get("k").await, Err(KvError::NotFound));
        assert!(!kv.contains("k"));

        // An expired key no longer blocks create.
        kv.create("k", write(b"b", None)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (kv, _) = backend();
        kv.delete("missing").await.unwrap();
        kv.set("k", write(b"a", None)).await.unwrap();
        kv.delete("k").await.unwrap();
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn transact_commits_callback_output() {
        let (kv, _) = backend();
        kv.set("k", write(b"a", None)).await.unwrap();

        let committed = kv
            .transact("k", |current: &[u8]| {
                let mut next = current.to_vec();
                next.push(b'b');
                Ok::<_, KvError>(KvWrite::new(next, None))
            })
            .await
            .unwrap();

        assert_eq!(committed, b"ab");
        assert_eq!(kv.get("k").await.unwrap(), b"ab");
    }

    #[tokio::test]
    async fn transact_on_missing_key_is_not_found() {
        let (kv, _) = backend();
        let result = kv
            .transact("k", |_: &[u8]| Ok::<_, KvError>(KvWrite::new(vec![], None)))
            .await;
        assert_eq!(result, Err(KvError::NotFound));
    }

    #[tokio::test]
    async fn callback_error_writes_nothing() {
        let (kv, _) = backend();
        kv.set("k", write(b"a", None)).await.unwrap();

        let result = kv
            .transact("k", |_: &[u8]| Err::<KvWrite, _>(KvError::Transport("nope".into())))
            .await;

        assert!(result.is_err());
        assert_eq!(kv.get("k").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn forced_abort_leaves_value_untouched() {
        let (kv, _) = backend();
        kv.set("k", write(b"a", None)).await.unwrap();
        kv.abort_next_transactions(1);

        let result = kv
            .transact("k", |_: &[u8]| Ok::<_, KvError>(KvWrite::new(b"z".to_vec(), None)))
            .await;

        assert_eq!(result, Err(KvError::Aborted));
        assert_eq!(kv.get("k").await.unwrap(), b"a");
        assert_eq!(kv.aborted_transactions(), 1);
    }

    #[tokio::test]
    async fn injected_transport_failures_are_consumed() {
        let (kv, _) = backend();
        kv.fail_next_transport(1);
        assert!(matches!(kv.get("k").await, Err(KvError::Transport(_))));
        assert_eq!(kv.get("k").await, Err(KvError::NotFound));
    }
}
