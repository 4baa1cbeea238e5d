use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use baraza_types::events::ChannelEvent;
use baraza_types::models::PresenceEntry;

use crate::error::RealtimeError;

/// Per-topic fan-out capacity. A lagged receiver drops the oldest events,
/// which consumers log and skip.
const TOPIC_CAPACITY: usize = 1024;

/// In-process push-channel primitive: per-topic event fan-out plus the
/// ephemeral presence sub-protocol. This is the single transport the rest
/// of the realtime layer talks to.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    topics: Mutex<HashMap<String, TopicState>>,
    closed: AtomicBool,
}

struct TopicState {
    tx: broadcast::Sender<ChannelEvent>,

    /// connection id -> records tracked by that connection. Cleared per
    /// connection on untrack; the full map is broadcast on every change.
    presence: BTreeMap<Uuid, Vec<PresenceEntry>>,
}

impl TopicState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            tx,
            presence: BTreeMap::new(),
        }
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Tear the transport down. Existing receivers keep draining what they
    /// already have; new subscribe attempts fail with a terminal status.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Open a receiver on a topic. Fails once the transport is closed —
    /// the caller gets a terminal status, never an automatic retry.
    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<ChannelEvent>, RealtimeError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RealtimeError::Transport(format!(
                "broker closed, cannot subscribe to {topic}"
            )));
        }

        let mut topics = self.lock_topics();
        let state = topics.entry(topic.to_string()).or_insert_with(TopicState::new);
        debug!(topic, "broker subscribe");
        Ok(state.tx.subscribe())
    }

    /// Deliver an event to every current subscriber of the topic, in send
    /// order. Events published with no subscribers are dropped.
    pub fn publish(&self, topic: &str, event: ChannelEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            warn!(topic, "publish on closed broker dropped");
            return;
        }

        let mut topics = self.lock_topics();
        let state = topics.entry(topic.to_string()).or_insert_with(TopicState::new);
        let _ = state.tx.send(event);
    }

    /// Presence sub-protocol: record the connection's presence entry and
    /// broadcast the full updated state to the topic. The snapshot is sent
    /// while the topics lock is still held: delivery order must equal
    /// snapshot version order, or a subscriber could end on a stale view.
    pub fn track(&self, topic: &str, connection_id: Uuid, entry: PresenceEntry) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let mut topics = self.lock_topics();
        let state = topics.entry(topic.to_string()).or_insert_with(TopicState::new);
        state.presence.insert(connection_id, vec![entry]);
        let _ = state
            .tx
            .send(ChannelEvent::PresenceSync(state.presence.clone()));
    }

    /// Drop the connection's presence records and broadcast the new state,
    /// also under the lock. No-op for connections that never tracked
    /// anything.
    pub fn untrack(&self, topic: &str, connection_id: Uuid) {
        let mut topics = self.lock_topics();
        let Some(state) = topics.get_mut(topic) else {
            return;
        };
        if state.presence.remove(&connection_id).is_none() {
            return;
        }
        let _ = state
            .tx
            .send(ChannelEvent::PresenceSync(state.presence.clone()));
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, TopicState>> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(user_id: Uuid) -> PresenceEntry {
        PresenceEntry {
            user_id,
            full_name: "A".to_string(),
            avatar_url: None,
            online_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_topic_subscribers() {
        let broker = Broker::new();
        let mut a = broker.subscribe("room:general").unwrap();
        let mut b = broker.subscribe("room:general").unwrap();
        let mut other = broker.subscribe("room:other").unwrap();

        broker.track("room:general", Uuid::new_v4(), entry(Uuid::new_v4()));

        assert!(matches!(a.recv().await, Ok(ChannelEvent::PresenceSync(_))));
        assert!(matches!(b.recv().await, Ok(ChannelEvent::PresenceSync(_))));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn untrack_broadcasts_shrunk_snapshot() {
        let broker = Broker::new();
        let mut rx = broker.subscribe("room:general").unwrap();
        let conn = Uuid::new_v4();

        broker.track("room:general", conn, entry(Uuid::new_v4()));
        broker.untrack("room:general", conn);

        let _ = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            ChannelEvent::PresenceSync(state) => assert!(state.is_empty()),
            other => panic!("expected PresenceSync, got {other:?}"),
        }

        // Untracking an unknown connection publishes nothing.
        broker.untrack("room:general", Uuid::new_v4());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_delivered_snapshot_matches_final_state() {
        let broker = Broker::new();
        let mut rx = broker.subscribe("room:general").unwrap();

        // Concurrent tracks: whatever interleaving the tasks land on, the
        // snapshot every subscriber ends on is the complete final state.
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                broker.track("room:general", Uuid::new_v4(), entry(Uuid::new_v4()));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = None;
        while let Ok(ChannelEvent::PresenceSync(state)) = rx.try_recv() {
            last = Some(state);
        }
        assert_eq!(last.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn subscribe_after_close_is_terminal() {
        let broker = Broker::new();
        broker.close();
        let err = broker.subscribe("room:general").unwrap_err();
        assert!(matches!(err, RealtimeError::Transport(_)));
    }
}
