//! Event-triggered session invalidator.
//!
//! Consumes account events and turns them into marker writes:
//!
//! | Event                 | Effect                          |
//! |-----------------------|---------------------------------|
//! | `EntitlementCreated`  | mark the owner's sessions stale |
//! | `EntitlementRevoked`  | mark the owner's sessions stale |
//! | `ProfileChanged`      | mark the user's sessions stale  |
//! | `CredentialsChanged`  | invalidate the user's sessions  |
//!
//! Markers are always written at processing time, never at a time carried by
//! the event, so redelivered or reordered events can only cause an extra
//! refresh.
//!
//! # Acknowledgement
//!
//! A delivery is acked only after its marker write succeeded. Transient
//! failures are retried a few times in place; if they persist, the delivery
//! is dropped unacked and the subscription is torn down, so the transport
//! redelivers it from the last committed position on the next subscribe.
//! Events that can never succeed (unknown type, undecodable payload, unknown
//! owner) are acked and skipped.
//!
//! # Lifecycle
//!
//! ```text
//! loop {
//!     subscribe
//!     process deliveries, up to `max_in_flight` at a time
//!     stream ended, failed or a delivery left unacked:
//!         wait `retry_delay`, resubscribe
//! }   // until the shutdown signal fires
//! ```

use crate::config::InvalidatorConfig;
use crate::error::Result;
use crate::events::{AccountEvent, SessionEffect, Subject};
use crate::manager::SessionManager;
use crate::providers::{DirectoryError, KvBackend, UserDirectory};
use crate::state::UserId;
use futures::{StreamExt, TryStreamExt};
use sessionward_core::event::SerializedEvent;
use sessionward_core::event_bus::{Delivery, EventBus, EventStream};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// In-place attempts for an event whose marker write hits a transient failure.
const HANDLE_ATTEMPTS: u32 = 3;

/// Pause between in-place attempts.
const HANDLE_BACKOFF: std::time::Duration = std::time::Duration::from_millis(200);

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A marker was written.
    Applied {
        /// Affected user.
        user_id: UserId,
        /// What was done to their sessions.
        effect: SessionEffect,
    },
    /// Nothing to do; the event is acked anyway.
    Skipped(SkipReason),
}

/// Why an event was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not an account event this service handles.
    UnhandledEventType,
    /// Payload does not decode.
    Undecodable,
    /// The entitlement's owner is unknown to the user directory.
    UnknownOwner,
}

impl Outcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Skipped(SkipReason::UnhandledEventType) => "unhandled",
            Self::Skipped(SkipReason::Undecodable) => "undecodable",
            Self::Skipped(SkipReason::UnknownOwner) => "unknown_owner",
        }
    }
}

/// Turns account events into session markers.
pub struct SessionInvalidator<B, D> {
    manager: SessionManager<B>,
    directory: Arc<D>,
    event_bus: Arc<dyn EventBus>,
    config: InvalidatorConfig,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<B, D> SessionInvalidator<B, D>
where
    B: KvBackend + 'static,
    D: UserDirectory + 'static,
{
    /// Create an invalidator. Without [`Self::with_shutdown`] it runs forever.
    #[must_use]
    pub fn new(
        manager: SessionManager<B>,
        directory: Arc<D>,
        event_bus: Arc<dyn EventBus>,
        config: InvalidatorConfig,
    ) -> Self {
        Self {
            manager,
            directory,
            event_bus,
            config,
            shutdown: None,
        }
    }

    /// Stop when `shutdown` fires (or all its senders are dropped).
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Spawn the subscribe-process-reconnect loop as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.take();
        let topics: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();

        info!(topics = ?topics, max_in_flight = self.config.max_in_flight, "Session invalidator started");

        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown) => break,
                subscribed = self.event_bus.subscribe(&topics) => match subscribed {
                    Ok(stream) => {
                        info!(topics = ?topics, "Subscribed to account events");
                        if self.consume(stream, &mut shutdown).await {
                            break;
                        }
                        warn!("Account event consumption stopped, resubscribing in {:?}", self.config.retry_delay);
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            "Failed to subscribe to account events, retrying in {:?}",
                            self.config.retry_delay
                        );
                    }
                },
            }

            tokio::select! {
                () = shutdown_requested(&mut shutdown) => break,
                () = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }

        info!("Session invalidator stopped");
    }

    /// Handle one event without touching its acknowledgement.
    ///
    /// # Errors
    ///
    /// Marker write or owner lookup failures. Events that can never succeed
    /// are reported as [`Outcome::Skipped`], not as errors.
    pub async fn handle(&self, event: &SerializedEvent) -> Result<Outcome> {
        let account_event = match AccountEvent::decode(event) {
            Ok(Some(account_event)) => account_event,
            Ok(None) => {
                debug!(event_type = %event.event_type, "Ignoring unhandled event type");
                return Ok(Outcome::Skipped(SkipReason::UnhandledEventType));
            }
            Err(e) => {
                warn!(
                    event_type = %event.event_type,
                    correlation_id = ?event.correlation_id,
                    error = %e,
                    "Skipping undecodable account event"
                );
                return Ok(Outcome::Skipped(SkipReason::Undecodable));
            }
        };

        let user_id = match account_event.subject() {
            Subject::User(user_id) => user_id,
            Subject::Entitlement(entitlement_id) => {
                match self.directory.owner_of_entitlement(entitlement_id).await {
                    Ok(user_id) => user_id,
                    Err(DirectoryError::NotFound) => {
                        warn!(entitlement_id = %entitlement_id, "Entitlement owner unknown, skipping event");
                        return Ok(Outcome::Skipped(SkipReason::UnknownOwner));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let now = self.manager.now();
        let effect = account_event.effect();
        match effect {
            SessionEffect::MarkStale => {
                self.manager
                    .mark_stale_user_sessions_before(user_id, now)
                    .await?;
            }
            SessionEffect::Invalidate => {
                self.manager
                    .invalidate_user_sessions_before(user_id, now)
                    .await?;
            }
        }

        Ok(Outcome::Applied { user_id, effect })
    }

    /// Handle a delivery and ack it on success.
    ///
    /// # Errors
    ///
    /// The failure that left the delivery unacknowledged, after the in-place
    /// retries for transient failures are used up.
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome> {
        let (event, acker) = delivery.into_parts();

        match self.handle_with_retry(&event).await {
            Ok(outcome) => {
                acker.ack();
                metrics::counter!("session_events_total", "outcome" => outcome.label()).increment(1);
                debug!(event_type = %event.event_type, outcome = ?outcome, "Account event processed");
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("session_events_total", "outcome" => "failed").increment(1);
                error!(
                    event_type = %event.event_type,
                    correlation_id = ?event.correlation_id,
                    error = %e,
                    "Failed to apply account event; leaving it unacknowledged"
                );
                Err(e)
            }
        }
    }

    async fn handle_with_retry(&self, event: &SerializedEvent) -> Result<Outcome> {
        let mut attempt = 1;
        loop {
            match self.handle(event).await {
                Err(e) if e.is_transient() && attempt < HANDLE_ATTEMPTS => {
                    warn!(attempt, error = %e, "Transient failure applying account event, retrying");
                    tokio::time::sleep(HANDLE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Process a stream until shutdown fires (`true`), or until it ends or a
    /// delivery is left unacknowledged (`false`).
    ///
    /// Stopping on an unacknowledged delivery drops the stream, which is what
    /// makes the transport hand the delivery out again after resubscribing.
    /// Deliveries still in flight at that point are dropped unacked as well.
    async fn consume(
        &self,
        stream: EventStream,
        shutdown: &mut Option<broadcast::Receiver<()>>,
    ) -> bool {
        let processing = stream
            .map(Ok::<_, crate::error::SessionError>)
            .try_for_each_concurrent(self.config.max_in_flight, |item| async move {
                match item {
                    Ok(delivery) => self.process(delivery).await.map(drop),
                    Err(e) => {
                        error!(error = %e, "Error receiving account event");
                        Ok(())
                    }
                }
            });

        tokio::select! {
            () = shutdown_requested(shutdown) => {
                info!("Session invalidator received shutdown signal during processing");
                true
            }
            processed = processing => {
                if processed.is_err() {
                    warn!("Account event left unacknowledged, dropping subscription for redelivery");
                }
                false
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            // Closed or lagged both mean the sender side is done with us.
            let _ = rx.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
