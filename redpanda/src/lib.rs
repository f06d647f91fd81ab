//! Redpanda event bus implementation for Sessionward.
//!
//! This crate provides a Redpanda-based event bus that implements the
//! [`EventBus`] trait from `sessionward-core`. It uses rdkafka for
//! Kafka-compatible event streaming, so any Kafka-compatible broker works.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │  account service   │
//! └─────────┬──────────┘
//!           │ publish (keyed by user)
//!           ▼
//! ┌────────────────────┐
//! │      Redpanda      │
//! └─────────┬──────────┘
//!           │ Delivery + Acker
//!           ▼
//! ┌────────────────────┐
//! │ SessionInvalidator │──▶ ack ──▶ offset commit
//! └────────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - An offset is committed only after the subscriber acked the delivery
//!   *and* every earlier delivery consumed by the same subscription
//! - A delivery dropped without an ack blocks commits for its partition until
//!   the subscription is recreated, so it is redelivered after a restart or
//!   rebalance
//! - Envelopes that do not decode are surfaced as stream errors and committed
//! - Ordering is guaranteed within a partition (same message key)
//!
//! **Configuration options**:
//! - `consumer_group`: Explicit consumer group for load balancing
//! - `buffer_size`: Maximum unacknowledged deliveries (default: 1000)
//! - `auto_offset_reset`: Where to start reading (default: "latest")
//!
//! # Example
//!
//! ```no_run
//! use sessionward_redpanda::RedpandaEventBus;
//! use sessionward_core::event_bus::EventBus;
//! use sessionward_core::event::SerializedEvent;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! let event = SerializedEvent::new("ProfileChanged.v1".to_string(), vec![1, 2, 3], None);
//! event_bus.publish("account-events", "user-42", &event).await?;
//!
//! let mut stream = event_bus.subscribe(&["account-events"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => {
//!             println!("Received: {}", delivery.event.event_type);
//!             delivery.ack();
//!         }
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use sessionward_core::event::SerializedEvent;
use sessionward_core::event_bus::{Acker, Delivery, EventBus, EventBusError, EventStream};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Redpanda event bus implementation.
///
/// # Configuration
///
/// The event bus can be configured with:
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: Explicit ID or derived from the topics
/// - **Buffer size**: Unacknowledged deliveries per subscription (default: 1000)
/// - **Offset reset**: Where new groups start reading (default: "latest")
///
/// # Example
///
/// ```no_run
/// use sessionward_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .consumer_group("sessionward-invalidator")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Unacknowledged deliveries allowed per subscription
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the configuration.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Every
    /// instance of the service should share one group so each event is
    /// handled once per deployment.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many deliveries may be outstanding (sent but not yet acked)
    /// per subscription. Consumption pauses when the limit is reached.
    ///
    /// Default: 1000. Zero is treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    /// - Invalid configuration
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

/// Consumer group used when none is configured.
fn default_group_id(topics: &[String]) -> String {
    let mut sorted = topics.to_vec();
    sorted.sort();
    format!("sessionward-{}", sorted.join("-"))
}

/// Where a consumed message sits in its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Decides which offsets may be committed as acks come back.
///
/// Acks are settled in consumption order. Once a delivery in a partition is
/// dropped unacked, nothing later in that partition is committed.
#[derive(Debug, Default)]
struct CommitTracker {
    blocked: HashSet<(String, i32)>,
}

impl CommitTracker {
    /// Settle the oldest outstanding delivery; returns the position to commit, if any.
    fn settle(&mut self, position: Position, acked: bool) -> Option<Position> {
        let partition = (position.topic.clone(), position.partition);
        if self.blocked.contains(&partition) {
            return None;
        }
        if !acked {
            tracing::warn!(
                topic = %position.topic,
                partition = position.partition,
                offset = position.offset,
                "Delivery dropped without ack; partition commits paused until resubscribe"
            );
            self.blocked.insert(partition);
            return None;
        }
        Some(position)
    }
}

fn commit<C: Consumer>(consumer: &C, position: &Position) {
    let mut list = TopicPartitionList::new();
    let added = list.add_partition_offset(
        &position.topic,
        position.partition,
        Offset::Offset(position.offset + 1),
    );
    let result = added.and_then(|()| consumer.commit(&list, CommitMode::Async));

    if let Err(e) = result {
        tracing::warn!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = bincode::serialize(&event).map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to serialize event: {e}"),
            })?;

            // Same key, same partition: events about one user stay ordered.
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_type = %event.event_type,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // Consume, forward and commit-on-ack in one task
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| default_group_id(&topics));

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size = buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(buffer_size);

            // The task owns the consumer: it forwards deliveries and commits
            // offsets as their acks come back, in consumption order.
            tokio::spawn(async move {
                let mut stream = consumer.stream();
                let mut pending = FuturesOrdered::new();
                let mut tracker = CommitTracker::default();

                loop {
                    tokio::select! {
                        Some((position, acked)) = pending.next(), if !pending.is_empty() => {
                            if let Some(position) = tracker.settle(position, acked) {
                                commit(&consumer, &position);
                            }
                        }
                        next = stream.next(), if pending.len() < buffer_size => {
                            let Some(received) = next else { break };
                            let message = match received {
                                Ok(message) => message,
                                Err(e) => {
                                    let err = EventBusError::TransportError(format!(
                                        "Failed to receive message: {e}"
                                    ));
                                    if tx.send(Err(err)).await.is_err() {
                                        break;
                                    }
                                    continue;
                                }
                            };

                            let position = Position {
                                topic: message.topic().to_string(),
                                partition: message.partition(),
                                offset: message.offset(),
                            };
                            let decoded = message
                                .payload()
                                .ok_or_else(|| "Message has no payload".to_string())
                                .and_then(|payload| {
                                    bincode::deserialize::<SerializedEvent>(payload)
                                        .map_err(|e| format!("Failed to deserialize event: {e}"))
                                });
                            drop(message);

                            let (acker, acked) = Acker::channel();
                            let item = match decoded {
                                Ok(event) => {
                                    tracing::trace!(
                                        topic = %position.topic,
                                        partition = position.partition,
                                        offset = position.offset,
                                        event_type = %event.event_type,
                                        "Received event"
                                    );
                                    Ok(Delivery::new(event, acker))
                                }
                                Err(reason) => {
                                    // Undecodable envelopes never succeed; let them commit.
                                    acker.ack();
                                    Err(EventBusError::DeserializationFailed(reason))
                                }
                            };

                            pending.push_back(acked.map(move |outcome| (position, outcome.is_ok())));

                            if tx.send(item).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }
                        }
                        () = tx.closed() => {
                            tracing::debug!("Subscriber dropped, exiting consumer task");
                            break;
                        }
                    }
                }

                tracing::debug!(outstanding = pending.len(), "Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(partition: i32, offset: i64) -> Position {
        Position {
            topic: "account-events".to_string(),
            partition,
            offset,
        }
    }

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_requires_brokers() {
        assert!(matches!(
            RedpandaEventBus::builder().build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn group_id_is_stable_across_topic_order() {
        let a = default_group_id(&["b".to_string(), "a".to_string()]);
        let b = default_group_id(&["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a, "sessionward-a-b");
    }

    #[test]
    fn acked_deliveries_are_committed() {
        let mut tracker = CommitTracker::default();
        assert_eq!(tracker.settle(at(0, 7), true), Some(at(0, 7)));
        assert_eq!(tracker.settle(at(0, 8), true), Some(at(0, 8)));
    }

    #[test]
    fn unacked_delivery_blocks_only_its_partition() {
        let mut tracker = CommitTracker::default();
        assert_eq!(tracker.settle(at(0, 7), false), None);
        assert_eq!(tracker.settle(at(0, 8), true), None);
        assert_eq!(tracker.settle(at(1, 3), true), Some(at(1, 3)));
    }
}
