use std::sync::Arc;

use tracing::debug;

use baraza_store::{Store, StoreError};
use baraza_types::events::{self, ChannelEvent};
use baraza_types::models::ChatMessage;
use baraza_types::notifications::Notification;

use crate::broker::Broker;
use crate::error::RealtimeError;
use crate::guard;

/// Composite collaborator: the row-store plus its change feed. Commits a
/// row, then publishes the insert event on the owning topic — components
/// above never publish for their own writes.
#[derive(Clone)]
pub struct Backend {
    store: Arc<Store>,
    broker: Broker,
}

impl Backend {
    pub fn new(store: Arc<Store>, broker: Broker) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Run a blocking store operation off the async runtime.
    pub(crate) async fn query<T, F>(&self, f: F) -> Result<T, RealtimeError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| RealtimeError::Task(e.to_string()))?
            .map_err(RealtimeError::from)
    }

    /// Commit a chat message row, then emit the insert event on the room
    /// topic in commit order. The emitted row carries the store's commit
    /// stamp, not the caller's clock.
    pub async fn commit_message(&self, message: ChatMessage) -> Result<ChatMessage, RealtimeError> {
        let stored = self
            .query(move |store| store.insert_message(&message))
            .await?;

        debug!(room = %stored.room_id, id = %stored.id, "message committed");
        self.broker.publish(
            &events::room_topic(&stored.room_id),
            ChannelEvent::MessageCreated(stored.clone()),
        );
        Ok(stored)
    }

    /// Commit a notification row, then emit an id-only insert event on the
    /// user's private topic. Returns `false` (committed nothing, published
    /// nothing) when the notification relation is not deployed yet.
    pub async fn commit_notification(&self, notification: &Notification) -> Result<bool, RealtimeError> {
        let row = notification.clone();
        // Softened `false` means the relation is missing and nothing was
        // written, so there is nothing to publish either.
        let committed = guard::soften(
            "insert_notification",
            self.query(move |store| store.insert_notification(&row).map(|_| true))
                .await,
        )?;
        if !committed {
            return Ok(false);
        }

        debug!(user = %notification.user_id, id = %notification.id, "notification committed");
        self.broker.publish(
            &events::user_notifications_topic(notification.user_id),
            ChannelEvent::NotificationCreated {
                id: notification.id,
                user_id: notification.user_id,
            },
        );
        Ok(true)
    }
}
