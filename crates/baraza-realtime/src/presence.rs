use std::collections::{BTreeMap, HashSet};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use baraza_types::events::ChannelEvent;
use baraza_types::models::PresenceEntry;

use crate::broker::Broker;
use crate::registry::{DeliveryToken, SubscriptionHandle};

/// Maintains the "who is online" view of one room. Shares the room's
/// subscription; every sync snapshot replaces the previous view wholesale,
/// so a missed snapshot can never leave the set permanently stale.
pub struct PresenceTracker {
    broker: Broker,
    topic: String,
    connection_id: Uuid,
    token: DeliveryToken,
    view: watch::Receiver<Vec<PresenceEntry>>,
    task: JoinHandle<()>,
}

impl PresenceTracker {
    /// Attach to an active room subscription. The tracker observes sync
    /// events from the point of attachment on.
    pub fn attach(broker: Broker, handle: &SubscriptionHandle) -> Self {
        let events = handle.events();
        let token = handle.token();
        let (tx, view) = watch::channel(Vec::new());

        let topic = handle.topic().to_string();
        let task_topic = topic.clone();
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            run_sync_loop(events, task_topic, loop_token, tx).await;
        });

        Self {
            broker,
            topic,
            connection_id: handle.connection_id(),
            token,
            view,
            task,
        }
    }

    /// Publish the local participant's presence record. Disappearance is
    /// the transport's job: entries drop out when their connection stops
    /// being tracked. A superseded session's announce is a no-op — the
    /// registry already untracked this connection, and re-adding it would
    /// leave an entry nothing will ever remove.
    pub fn announce(&self, entry: PresenceEntry) {
        if !self.token.is_live() {
            debug!(topic = %self.topic, "announce on a released subscription ignored");
            return;
        }
        self.broker.track(&self.topic, self.connection_id, entry);
    }

    /// Watch the deduplicated online set. The receiver always holds the
    /// latest snapshot.
    pub fn watch(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.view.clone()
    }

    pub fn current(&self) -> Vec<PresenceEntry> {
        self.view.borrow().clone()
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_sync_loop(
    mut events: broadcast::Receiver<ChannelEvent>,
    topic: String,
    token: DeliveryToken,
    tx: watch::Sender<Vec<PresenceEntry>>,
) {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::PresenceSync(state)) => {
                if !token.is_live() {
                    break;
                }
                let view = fold_snapshot(state);
                debug!(topic, online = view.len(), "presence view rebuilt");
                if tx.send(view).is_err() {
                    break;
                }
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Snapshots are full-state; only the latest one matters.
                warn!(topic, skipped = n, "presence receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Flatten a connection->records snapshot into the online set: one entry
/// per user_id, first record encountered wins. One identity may hold many
/// simultaneous connections, and the transport may double-report — the
/// rebuild enforces uniqueness rather than assuming it.
pub fn fold_snapshot(state: BTreeMap<Uuid, Vec<PresenceEntry>>) -> Vec<PresenceEntry> {
    let mut seen = HashSet::new();
    let mut view = Vec::new();
    for records in state.into_values() {
        for entry in records {
            if seen.insert(entry.user_id) {
                view.push(entry);
            }
        }
    }
    view
}
