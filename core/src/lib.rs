//! # Sessionward Core
//!
//! Core traits and types shared by every Sessionward crate.
//!
//! This crate deliberately knows nothing about sessions, Redis or HTTP. It
//! provides the seams the other crates plug into:
//!
//! - **Environment**: the [`environment::Clock`] abstraction so that time is
//!   injected rather than read from a global
//! - **Events**: the [`event::Event`] trait and the [`event::SerializedEvent`]
//!   wire format used for domain events
//! - **Event bus**: the [`event_bus::EventBus`] trait with explicit
//!   per-delivery acknowledgement (at-least-once consumption)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ sessionward-redpanda │     │ sessionward-testing  │
//! │  (Kafka transport)   │     │  (in-memory bus)     │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │   implements EventBus      │
//!            └─────────────┬──────────────┘
//!                          ▼
//!               ┌──────────────────────┐
//!               │  sessionward-core    │
//!               └──────────▲───────────┘
//!                          │  consumes EventBus + Clock
//!               ┌──────────┴───────────┐
//!               │  sessionward-auth    │
//!               └──────────────────────┘
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod environment;
pub mod event;
pub mod event_bus;
