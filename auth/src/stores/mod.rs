//! Storage implementations for the session system.
//!
//! - **Redis backend** - sessions and per-user markers with TTLs and
//!   `WATCH`/`MULTI`/`EXEC` optimistic transactions

pub mod redis_backend;

pub use redis_backend::RedisBackend;
