//! Key-value backend trait.

use chrono::Duration;
use thiserror::Error;

/// Errors reported by a key-value backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The key does not exist (or has expired).
    #[error("Key not found")]
    NotFound,

    /// The key already exists.
    #[error("Key already exists")]
    AlreadyExists,

    /// A watched key changed before the transaction committed.
    #[error("Transaction aborted by a concurrent write")]
    Aborted,

    /// Network, protocol or server failure.
    #[error("Backend transport error: {0}")]
    Transport(String),
}

/// A value to store and its expiry. `ttl: None` stores without expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvWrite {
    /// Bytes to store.
    pub value: Vec<u8>,
    /// Time to live.
    pub ttl: Option<Duration>,
}

impl KvWrite {
    /// A write with the given TTL.
    #[must_use]
    pub const fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self { value, ttl }
    }
}

/// Key-value backend with TTLs and optimistic transactions.
///
/// # Implementation Notes
///
/// - TTLs shorter than one millisecond are rounded up to one millisecond
/// - `transact` must commit only if the key is unchanged since it was read;
///   otherwise it fails with [`KvError::Aborted`] and writes nothing
/// - `transact` never retries on its own; retry policy belongs to the caller
pub trait KvBackend: Send + Sync {
    /// Store `write` under `key` only if the key does not exist.
    ///
    /// # Errors
    ///
    /// - [`KvError::AlreadyExists`] if the key is present
    /// - [`KvError::Transport`] on backend failure
    fn create(
        &self,
        key: &str,
        write: KvWrite,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// - [`KvError::NotFound`] if the key is absent
    /// - [`KvError::Transport`] on backend failure
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Vec<u8>, KvError>> + Send;

    /// Replace the value under `key` only if the key exists.
    ///
    /// # Errors
    ///
    /// - [`KvError::NotFound`] if the key is absent
    /// - [`KvError::Transport`] on backend failure
    fn conditional_set(
        &self,
        key: &str,
        write: KvWrite,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Store `write` under `key` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Transport`] on backend failure.
    fn set(
        &self,
        key: &str,
        write: KvWrite,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Transport`] on backend failure.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Read-modify-write `key` in one optimistic transaction.
    ///
    /// Watches `key`, reads it, passes the current bytes to `f` and commits
    /// what `f` returns. If `f` fails, nothing is written and its error is
    /// returned. On success the committed bytes are returned.
    ///
    /// # Errors
    ///
    /// - `KvError::NotFound` (converted into `E`) if the key is absent
    /// - `KvError::Aborted` (converted into `E`) if the key changed between
    ///   the read and the commit
    /// - `KvError::Transport` (converted into `E`) on backend failure
    /// - whatever `f` returns
    fn transact<F, E>(
        &self,
        key: &str,
        f: F,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, E>> + Send
    where
        F: FnOnce(&[u8]) -> Result<KvWrite, E> + Send,
        E: From<KvError> + Send;
}
