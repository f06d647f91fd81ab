//! Redis key-value backend.
//!
//! # Architecture
//!
//! - Plain reads and writes go through a shared `ConnectionManager`
//!   (multiplexed, reconnecting).
//! - `transact` opens a dedicated connection per call. `WATCH` state belongs
//!   to a connection, so it cannot share the multiplexed one with other
//!   callers.
//! - TTLs are set with `PX` (milliseconds) on the same `SET` that writes the
//!   value.
//!
//! # Example
//!
//! ```no_run
//! use sessionward_auth::stores::RedisBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisBackend::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use crate::providers::{KvBackend, KvError, KvWrite};
use chrono::Duration;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{Client, Cmd};

/// Redis-backed [`KvBackend`].
#[derive(Clone)]
pub struct RedisBackend {
    /// Client used to open dedicated transaction connections.
    client: Client,
    /// Shared connection for everything else.
    conn_manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Transport`] if the URL is invalid or the first
    /// connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, KvError> {
        let client = Client::open(redis_url)
            .map_err(|e| KvError::Transport(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            KvError::Transport(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(url = %redacted(redis_url), "Connected to Redis");

        Ok(Self {
            client,
            conn_manager,
        })
    }

    /// Round-trip a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Transport`] if Redis does not answer.
    pub async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to ping Redis: {e}")))?;
        Ok(())
    }
}

/// `SET key value [NX|XX] [PX ms]`
fn set_cmd(key: &str, write: &KvWrite, condition: Option<&str>) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(&write.value);
    if let Some(condition) = condition {
        cmd.arg(condition);
    }
    if let Some(ttl) = write.ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

/// Redis rejects non-positive expiries; round up to one millisecond.
fn ttl_millis(ttl: Duration) -> i64 {
    ttl.num_milliseconds().max(1)
}

/// Strip credentials from a connection URL before logging it.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

async fn unwatch<C: ConnectionLike + Send>(conn: &mut C) {
    let result: redis::RedisResult<()> = redis::cmd("UNWATCH").query_async(conn).await;
    if let Err(e) = result {
        tracing::debug!(error = %e, "UNWATCH failed; connection is discarded anyway");
    }
}

impl KvBackend for RedisBackend {
    async fn create(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        let mut conn = self.conn_manager.clone();

        let reply: Option<String> = set_cmd(key, &write, Some("NX"))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to create key: {e}")))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(KvError::AlreadyExists),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let mut conn = self.conn_manager.clone();

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to get key: {e}")))?;

        value.ok_or(KvError::NotFound)
    }

    async fn conditional_set(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        let mut conn = self.conn_manager.clone();

        let reply: Option<String> = set_cmd(key, &write, Some("XX"))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to update key: {e}")))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(KvError::NotFound),
        }
    }

    async fn set(&self, key: &str, write: KvWrite) -> Result<(), KvError> {
        let mut conn = self.conn_manager.clone();

        let _: Option<String> = set_cmd(key, &write, None)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to set key: {e}")))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn_manager.clone();

        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to delete key: {e}")))?;

        tracing::debug!(key = %key, removed, "Deleted key");

        Ok(())
    }

    async fn transact<F, E>(&self, key: &str, f: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce(&[u8]) -> Result<KvWrite, E> + Send,
        E: From<KvError> + Send,
    {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KvError::Transport(format!("Failed to open transaction connection: {e}")))?;

        let _: () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to watch key: {e}")))?;

        let current: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to read watched key: {e}")))?;

        let Some(current) = current else {
            unwatch(&mut conn).await;
            return Err(KvError::NotFound.into());
        };

        let write = match f(&current) {
            Ok(write) => write,
            Err(e) => {
                unwatch(&mut conn).await;
                return Err(e);
            }
        };

        let mut pipe = redis::pipe();
        pipe.atomic().add_command(set_cmd(key, &write, None)).ignore();

        // EXEC replies nil when a watched key changed.
        let committed: Option<()> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Transport(format!("Failed to commit transaction: {e}")))?;

        match committed {
            Some(()) => Ok(write.value),
            None => {
                tracing::debug!(key = %key, "Transaction aborted by concurrent write");
                Err(KvError::Aborted.into())
            }
        }
    }
}
