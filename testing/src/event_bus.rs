//! In-memory event bus with acknowledgement tracking.

use sessionward_core::event::SerializedEvent;
use sessionward_core::event_bus::{Acker, Delivery, EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Sender = mpsc::UnboundedSender<Result<Delivery, EventBusError>>;

#[derive(Default)]
struct BusState {
    subscribers: Vec<(Vec<String>, Sender)>,
    published: Vec<(String, String, SerializedEvent)>,
    /// Dropped without ack, waiting for the next subscription to their topic.
    redeliveries: Vec<(String, SerializedEvent)>,
    failing_subscribes: usize,
}

#[derive(Default)]
struct AckCounters {
    acked: AtomicUsize,
    unacked: AtomicUsize,
}

/// In-memory [`EventBus`] for tests.
///
/// Every published event is fanned out to the live subscribers of its
/// topic. Each delivery's acknowledgement is tracked: [`Self::acked`] counts
/// deliveries that were acked, [`Self::unacked`] counts deliveries dropped
/// without an ack.
///
/// Like an uncommitted offset, a delivery dropped without an ack is handed
/// out again to the next subscription of its topic.
///
/// # Example
///
/// ```
/// use sessionward_testing::InMemoryEventBus;
/// use sessionward_core::event::SerializedEvent;
/// use sessionward_core::event_bus::EventBus;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["accounts"]).await.unwrap();
///
/// let event = SerializedEvent::new("ProfileChanged.v1".to_string(), vec![], None);
/// bus.publish("accounts", "user-1", &event).await.unwrap();
///
/// let delivery = stream.next().await.unwrap().unwrap();
/// delivery.ack();
/// assert!(bus.wait_for_settled(1, std::time::Duration::from_secs(1)).await);
/// assert_eq!(bus.acked(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    counters: Arc<AckCounters>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` subscribe calls fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.with_state(|state| state.failing_subscribes = count);
    }

    /// End every open subscription stream.
    pub fn close_subscriptions(&self) {
        self.with_state(|state| state.subscribers.clear());
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.with_state(|state| {
            state.subscribers.retain(|(_, tx)| !tx.is_closed());
            state.subscribers.len()
        })
    }

    /// Everything published so far as `(topic, key, event)`.
    #[must_use]
    pub fn published(&self) -> Vec<(String, String, SerializedEvent)> {
        self.with_state(|state| state.published.clone())
    }

    /// Deliveries acknowledged so far.
    #[must_use]
    pub fn acked(&self) -> usize {
        self.counters.acked.load(Ordering::SeqCst)
    }

    /// Deliveries dropped without acknowledgement so far.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.counters.unacked.load(Ordering::SeqCst)
    }

    /// Wait until `count` deliveries have been acked or dropped.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_settled(&self, count: usize, timeout: std::time::Duration) -> bool {
        let settled = async {
            while self.acked() + self.unacked() < count {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, settled).await.is_ok()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BusState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }

    fn tracked_delivery(&self, topic: String, event: SerializedEvent) -> Delivery {
        let (acker, outcome) = Acker::channel();
        let counters = Arc::clone(&self.counters);
        let bus = self.clone();
        let delivered = event.clone();
        tokio::spawn(async move {
            if outcome.await.is_ok() {
                counters.acked.fetch_add(1, Ordering::SeqCst);
            } else {
                bus.with_state(|state| state.redeliveries.push((topic, delivered)));
                counters.unacked.fetch_add(1, Ordering::SeqCst);
            }
        });
        Delivery::new(event, acker)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let event = event.clone();

        Box::pin(async move {
            let targets: Vec<Sender> = self.with_state(|state| {
                state.subscribers.retain(|(_, tx)| !tx.is_closed());
                state
                    .published
                    .push((topic.clone(), key.clone(), event.clone()));
                state
                    .subscribers
                    .iter()
                    .filter(|(topics, _)| topics.contains(&topic))
                    .map(|(_, tx)| tx.clone())
                    .collect()
            });

            for tx in targets {
                // A subscriber that went away between the filter and the send is fine.
                let _ = tx.send(Ok(self.tracked_delivery(topic.clone(), event.clone())));
            }

            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();

        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();

            let redeliveries = self.with_state(|state| {
                if state.failing_subscribes > 0 {
                    state.failing_subscribes -= 1;
                    return None;
                }
                let (due, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.redeliveries)
                    .into_iter()
                    .partition(|(topic, _)| topics.contains(topic));
                state.redeliveries = kept;
                state.subscribers.push((topics.clone(), tx.clone()));
                Some(due)
            });
            let Some(redeliveries) = redeliveries else {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "injected subscribe failure".to_string(),
                });
            };

            for (topic, event) in redeliveries {
                let _ = tx.send(Ok(self.tracked_delivery(topic, event)));
            }

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn event(event_type: &str) -> SerializedEvent {
        SerializedEvent::new(event_type.to_string(), vec![7], None)
    }

    #[tokio::test]
    async fn events_reach_matching_subscribers_only() {
        let bus = InMemoryEventBus::new();
        let mut accounts = bus.subscribe(&["accounts"]).await.unwrap();
        let mut orders = bus.subscribe(&["orders"]).await.unwrap();

        bus.publish("accounts", "u-1", &event("A.v1")).await.unwrap();
        bus.close_subscriptions();

        let delivered = accounts.next().await.unwrap().unwrap();
        assert_eq!(delivered.event.event_type, "A.v1");
        delivered.ack();
        assert!(accounts.next().await.is_none());
        assert!(orders.next().await.is_none());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn acks_and_drops_are_counted() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["accounts"]).await.unwrap();

        bus.publish("accounts", "u-1", &event("A.v1")).await.unwrap();
        bus.publish("accounts", "u-1", &event("B.v1")).await.unwrap();

        stream.next().await.unwrap().unwrap().ack();
        drop(stream.next().await.unwrap().unwrap());

        assert!(bus.wait_for_settled(2, Duration::from_secs(1)).await);
        assert_eq!(bus.acked(), 1);
        assert_eq!(bus.unacked(), 1);
    }

    #[tokio::test]
    async fn unacked_delivery_goes_to_next_subscription() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe(&["accounts"]).await.unwrap();
        bus.publish("accounts", "u-1", &event("A.v1")).await.unwrap();

        drop(first.next().await.unwrap().unwrap());
        assert!(bus.wait_for_settled(1, Duration::from_secs(1)).await);
        drop(first);

        let mut orders = bus.subscribe(&["orders"]).await.unwrap();
        let mut second = bus.subscribe(&["accounts"]).await.unwrap();
        let again = second.next().await.unwrap().unwrap();
        assert_eq!(again.event.event_type, "A.v1");
        again.ack();

        assert!(bus.wait_for_settled(2, Duration::from_secs(1)).await);
        assert_eq!(bus.acked(), 1);
        assert_eq!(bus.unacked(), 1);

        bus.close_subscriptions();
        assert!(orders.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_subscribe_failure() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_subscribes(1);
        assert!(bus.subscribe(&["accounts"]).await.is_err());
        let _stream = bus.subscribe(&["accounts"]).await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
