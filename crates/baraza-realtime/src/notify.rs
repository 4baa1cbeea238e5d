use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use baraza_types::events::{self, ChannelEvent};
use baraza_types::notifications::{
    Notification, NotificationDraft, NotificationFilters, SourceType,
};

use crate::backend::Backend;
use crate::error::RealtimeError;
use crate::guard;
use crate::registry::{ChannelRegistry, DeliveryToken, SubscriptionHandle};

/// State machine over persisted notifications plus the realtime feed of
/// newly created ones. Every store operation sits behind the degradation
/// guard, so a not-yet-deployed notification relation degrades to empty
/// results instead of failing the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    backend: Backend,
    registry: ChannelRegistry,
}

impl NotificationDispatcher {
    pub fn new(backend: Backend, registry: ChannelRegistry) -> Self {
        Self { backend, registry }
    }

    /// Insert a notification in the initial state (unread, active, not
    /// dismissed). Returns `None` when the relation is not deployed yet —
    /// the write degrades to a no-op. The backend publishes the insert
    /// event post-commit; this operation never publishes itself.
    pub async fn create(
        &self,
        user_id: Uuid,
        source_type: SourceType,
        title: &str,
        message: &str,
        draft: NotificationDraft,
    ) -> Result<Option<Uuid>, RealtimeError> {
        if title.trim().is_empty() {
            return Err(RealtimeError::Validation("notification title is empty".into()));
        }
        if message.trim().is_empty() {
            return Err(RealtimeError::Validation("notification message is empty".into()));
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            source_type,
            source_id: draft.source_id,
            actor_id: draft.actor_id,
            title: title.to_string(),
            message: message.to_string(),
            link: draft.link,
            image_url: draft.image_url,
            metadata: draft.metadata.unwrap_or_else(|| serde_json::json!({})),
            priority: draft.priority,
            category: draft
                .category
                .unwrap_or_else(|| source_type.default_category().to_string()),
            is_read: false,
            read_at: None,
            is_archived: false,
            archived_at: None,
            is_dismissed: false,
            created_at: Utc::now(),
            expires_at: draft.expires_at,
        };

        let committed = self.backend.commit_notification(&notification).await?;
        Ok(committed.then_some(notification.id))
    }

    /// Idempotent transition to read; `read_at` is set on the first call
    /// only. Returns whether this call changed the row.
    pub async fn mark_as_read(&self, id: Uuid) -> Result<bool, RealtimeError> {
        guard::soften(
            "mark_as_read",
            self.backend.query(move |store| store.mark_read(id)).await,
        )
    }

    /// Bulk transition over an explicit id list.
    pub async fn mark_many_as_read(&self, ids: Vec<Uuid>) -> Result<u64, RealtimeError> {
        guard::soften(
            "mark_many_as_read",
            self.backend
                .query(move |store| store.mark_read_many(&ids))
                .await,
        )
    }

    /// Transition every active unread notification of the user to read.
    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, RealtimeError> {
        guard::soften(
            "mark_all_as_read",
            self.backend
                .query(move |store| store.mark_all_read(user_id))
                .await,
        )
    }

    /// Terminal within this core: excluded from listing and the unread
    /// count from now on.
    pub async fn archive(&self, id: Uuid) -> Result<bool, RealtimeError> {
        guard::soften(
            "archive",
            self.backend
                .query(move |store| store.archive_notification(id))
                .await,
        )
    }

    /// Feed-visibility flag only; read and archive state are untouched and
    /// the unread count does not change.
    pub async fn dismiss(&self, id: Uuid) -> Result<bool, RealtimeError> {
        guard::soften(
            "dismiss",
            self.backend
                .query(move |store| store.dismiss_notification(id))
                .await,
        )
    }

    /// Active notifications, newest first, optionally narrowed by filters.
    pub async fn list(
        &self,
        user_id: Uuid,
        filters: NotificationFilters,
    ) -> Result<Vec<Notification>, RealtimeError> {
        guard::soften(
            "list",
            self.backend
                .query(move |store| store.list_notifications(user_id, &filters))
                .await,
        )
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, RealtimeError> {
        guard::soften(
            "unread_count",
            self.backend
                .query(move |store| store.unread_count(user_id))
                .await,
        )
    }

    /// Open the user's private notification topic. For every insert event
    /// the full row is re-fetched — the event payload is never trusted —
    /// and the callback runs exactly once. Dropping the returned feed (or
    /// calling `unsubscribe`) tears the subscription down.
    pub fn subscribe<F>(&self, user_id: Uuid, callback: F) -> Result<NotificationFeed, RealtimeError>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let mut handle = self
            .registry
            .subscribe(&events::user_notifications_topic(user_id))?;
        let events_rx = handle.take_events();
        let token = handle.token();
        let backend = self.backend.clone();

        info!(%user_id, "notification feed opened");
        let task = tokio::spawn(run_feed_loop(events_rx, token, backend, user_id, callback));

        Ok(NotificationFeed {
            _handle: handle,
            task,
        })
    }
}

async fn run_feed_loop<F>(
    mut events: broadcast::Receiver<ChannelEvent>,
    token: DeliveryToken,
    backend: Backend,
    user_id: Uuid,
    callback: F,
) where
    F: Fn(Notification) + Send + Sync + 'static,
{
    loop {
        match events.recv().await {
            Ok(ChannelEvent::NotificationCreated { id, .. }) => {
                let fetched = guard::soften(
                    "notification_by_id",
                    backend
                        .query(move |store| store.notification_by_id(id))
                        .await,
                );
                let notification = match fetched {
                    Ok(Some(n)) => n,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "notification re-fetch failed, skipping event");
                        continue;
                    }
                };

                if !token.is_live() {
                    break;
                }
                debug!(%user_id, id = %notification.id, "notification delivered");
                callback(notification);
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(%user_id, skipped = n, "notification receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Scoped realtime feed: dropping it releases the topic and stops the
/// delivery task on every exit path.
pub struct NotificationFeed {
    _handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl NotificationFeed {
    pub fn unsubscribe(self) {
        // Drop does the teardown.
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
