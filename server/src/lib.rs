//! Session service wiring.
//!
//! Configuration loading and the HTTP user directory client. The binary in
//! `main.rs` assembles them with Redis, Redpanda and the Axum router.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod config;
pub mod directory;

pub use config::{ConfigError, ServerConfig};
pub use directory::HttpUserDirectory;
