//! Optimistic retry loop.

use crate::error::{Result, SessionError};
use crate::providers::KvError;
use std::future::Future;

/// Run `attempt` until it stops reporting a write conflict.
///
/// Only [`KvError::Aborted`] is retried; every other outcome (success or
/// error) is returned as is. Each attempt must redo the whole
/// watch-read-modify-commit cycle. After `max_attempts` conflicts the loop
/// gives up with [`SessionError::MaxAttemptsReached`].
///
/// # Errors
///
/// Whatever `attempt` returns other than a conflict, or
/// `MaxAttemptsReached`.
pub async fn with_optimistic_retry<T, F, Fut>(key: &str, max_attempts: u32, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);

    for n in 1..=max_attempts {
        match attempt().await {
            Err(SessionError::Backend(KvError::Aborted)) => {
                metrics::counter!("session_optimistic_retries_total").increment(1);
                tracing::debug!(key = %key, attempt = n, "Concurrent write detected, retrying");
            }
            outcome => return outcome,
        }
    }

    metrics::counter!("session_optimistic_exhausted_total").increment(1);
    tracing::warn!(
        key = %key,
        attempts = max_attempts,
        "Optimistic update gave up under contention"
    );

    Err(SessionError::MaxAttemptsReached {
        attempts: max_attempts,
    })
}
