use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use baraza_types::events::ChannelEvent;

use crate::broker::Broker;
use crate::error::RealtimeError;

/// Owns the "one live subscription per topic" rule for a client session.
/// Re-subscribing a topic tears the previous subscription down first, so
/// there is never duplicate delivery or a leaked connection. The registry
/// does not retry failed subscribes — that policy belongs to the caller.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    broker: Broker,
    topics: Mutex<HashMap<String, ActiveTopic>>,
    next_epoch: AtomicU64,
}

struct ActiveTopic {
    epoch: u64,
    connection_id: Uuid,
}

impl RegistryInner {
    fn is_live(&self, topic: &str, epoch: u64) -> bool {
        self.lock_topics()
            .get(topic)
            .is_some_and(|active| active.epoch == epoch)
    }

    /// Tear down the topic's subscription, but only if `epoch` still owns
    /// it. A stale handle dropping after a re-subscribe must not touch the
    /// newer subscription.
    fn release(&self, topic: &str, epoch: u64) {
        let connection_id = {
            let mut topics = self.lock_topics();
            if !topics.get(topic).is_some_and(|active| active.epoch == epoch) {
                return;
            }
            match topics.remove(topic) {
                Some(active) => active.connection_id,
                None => return,
            }
        };
        self.broker.untrack(topic, connection_id);
        debug!(topic, epoch, "subscription released");
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveTopic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChannelRegistry {
    pub fn new(broker: Broker) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                broker,
                topics: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    /// Open (or replace) the session's subscription for a topic. Any
    /// previous subscription for the same topic is torn down first; its
    /// handle and token go stale immediately.
    pub fn subscribe(&self, topic: &str) -> Result<SubscriptionHandle, RealtimeError> {
        let previous = {
            let topics = self.inner.lock_topics();
            topics.get(topic).map(|active| active.epoch)
        };
        if let Some(epoch) = previous {
            info!(topic, "replacing existing subscription");
            self.inner.release(topic, epoch);
        }

        let rx = self.inner.broker.subscribe(topic)?;
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let connection_id = Uuid::new_v4();

        self.inner.lock_topics().insert(
            topic.to_string(),
            ActiveTopic {
                epoch,
                connection_id,
            },
        );
        debug!(topic, epoch, "subscribed");

        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            epoch,
            connection_id,
            rx,
            registry: self.inner.clone(),
        })
    }
}

/// A live subscription, scoped to its owner: dropping the handle releases
/// the topic on every exit path. `unsubscribe` is the explicit spelling of
/// the same thing and is idempotent (a stale handle releases nothing).
pub struct SubscriptionHandle {
    topic: String,
    epoch: u64,
    connection_id: Uuid,
    rx: broadcast::Receiver<ChannelEvent>,
    registry: Arc<RegistryInner>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("epoch", &self.epoch)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Identifies this subscription to the presence sub-protocol.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Move the event stream out of the handle. The first caller gets every
    /// event since subscribe; later callers observe from the point of call.
    pub fn take_events(&mut self) -> broadcast::Receiver<ChannelEvent> {
        let replacement = self.rx.resubscribe();
        std::mem::replace(&mut self.rx, replacement)
    }

    /// Additional stream observing from now on (e.g. the presence tracker
    /// sharing the room's subscription).
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.rx.resubscribe()
    }

    /// Generation token async consumers check before delivering any late
    /// result. Goes dead the moment this subscription is torn down.
    pub fn token(&self) -> DeliveryToken {
        DeliveryToken {
            registry: self.registry.clone(),
            topic: self.topic.clone(),
            epoch: self.epoch,
        }
    }

    pub fn unsubscribe(self) {
        // Drop does the release.
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.release(&self.topic, self.epoch);
    }
}

/// Cheap, clonable liveness check for one subscription generation.
#[derive(Clone)]
pub struct DeliveryToken {
    registry: Arc<RegistryInner>,
    topic: String,
    epoch: u64,
}

impl DeliveryToken {
    pub fn is_live(&self) -> bool {
        self.registry.is_live(&self.topic, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baraza_types::models::ChatMessage;
    use chrono::Utc;

    fn message() -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            room_id: "general".to_string(),
            user_id: Uuid::new_v4(),
            content: "hi".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn events_flow_until_unsubscribe() {
        let broker = Broker::new();
        let registry = ChannelRegistry::new(broker.clone());

        let mut handle = registry.subscribe("room:general").unwrap();
        let mut events = handle.take_events();

        broker.publish("room:general", ChannelEvent::MessageCreated(message()));
        assert!(matches!(
            events.recv().await,
            Ok(ChannelEvent::MessageCreated(_))
        ));

        let token = handle.token();
        assert!(token.is_live());
        handle.unsubscribe();
        assert!(!token.is_live());
    }

    #[tokio::test]
    async fn resubscribe_invalidates_the_previous_generation() {
        let broker = Broker::new();
        let registry = ChannelRegistry::new(broker.clone());

        let first = registry.subscribe("room:general").unwrap();
        let stale = first.token();

        let second = registry.subscribe("room:general").unwrap();
        let live = second.token();

        assert!(!stale.is_live());
        assert!(live.is_live());

        // The stale handle dropping must not tear down the new subscription.
        drop(first);
        assert!(live.is_live());
    }

    #[tokio::test]
    async fn drop_releases_on_every_exit_path() {
        let broker = Broker::new();
        let registry = ChannelRegistry::new(broker.clone());

        let token = {
            let handle = registry.subscribe("room:general").unwrap();
            handle.token()
            // handle dropped here
        };
        assert!(!token.is_live());

        // Topic is free again.
        let handle = registry.subscribe("room:general").unwrap();
        assert!(handle.token().is_live());
    }

    #[tokio::test]
    async fn subscribe_failure_is_terminal_and_leaves_no_entry() {
        let broker = Broker::new();
        let registry = ChannelRegistry::new(broker.clone());
        broker.close();

        let err = registry.subscribe("room:general").unwrap_err();
        assert!(matches!(err, RealtimeError::Transport(_)));
    }
}
