use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use baraza_types::events::{self, ChannelEvent};
use baraza_types::models::{
    ANONYMOUS_AUTHOR, AuthorView, ChatMessage, EnrichedMessage, PresenceEntry,
};

use crate::backend::Backend;
use crate::error::RealtimeError;
use crate::presence::PresenceTracker;
use crate::registry::{ChannelRegistry, DeliveryToken};
use crate::resolver::ProfileResolver;

/// Upper bound on message content length, enforced before any write.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Default backfill page on room load.
pub const DEFAULT_BACKFILL: u32 = 100;

/// Buffered enriched messages per session before the forwarder applies
/// backpressure.
const SESSION_BUFFER: usize = 256;

/// One client's membership in a chat room: backfilled history, the live
/// enriched message stream, presence, and the send path. Leaving the room
/// (or dropping the session) tears the subscription down.
pub struct RoomSession {
    room_id: String,
    user_id: Uuid,
    backend: Backend,
    resolver: ProfileResolver,
    history: Vec<EnrichedMessage>,
    messages: mpsc::Receiver<EnrichedMessage>,
    presence: PresenceTracker,
    // Handle lives here so the registry entry survives as long as the
    // session (released on drop). The streams were taken out of it.
    _handle: crate::registry::SubscriptionHandle,
    hydrator: JoinHandle<()>,
}

impl RoomSession {
    /// Subscribe to the room topic and backfill the most recent messages:
    /// one batched profile lookup over the page's distinct authors, then
    /// every row enriched from the resulting map.
    pub async fn join(
        registry: &ChannelRegistry,
        backend: Backend,
        user_id: Uuid,
        room_id: &str,
        backfill_limit: u32,
    ) -> Result<Self, RealtimeError> {
        let handle = registry.subscribe(&events::room_topic(room_id))?;
        let token = handle.token();
        let resolver = ProfileResolver::new(backend.store().clone());

        // Backfill page, oldest first.
        let room = room_id.to_string();
        let rows = backend
            .query(move |store| store.recent_messages(&room, backfill_limit))
            .await?;

        let mut authors: Vec<Uuid> = Vec::new();
        for row in &rows {
            if !authors.contains(&row.user_id) {
                authors.push(row.user_id);
            }
        }
        let profiles = match resolver.many(authors).await {
            Ok(map) => map,
            Err(err) => {
                warn!(%err, "backfill profile lookup failed, using placeholders");
                HashMap::new()
            }
        };

        let history: Vec<EnrichedMessage> = rows
            .into_iter()
            .map(|message| enrich(message, &profiles))
            .collect();

        info!(room_id, backfilled = history.len(), "joined room");

        // Observe live events from after the backfill query, so a row the
        // page already captured is not delivered a second time.
        let events_rx = handle.events();
        let (tx, messages) = mpsc::channel(SESSION_BUFFER);
        let hydrator = tokio::spawn(run_hydration_loop(
            events_rx,
            token,
            resolver.clone(),
            room_id.to_string(),
            tx,
        ));

        let presence = PresenceTracker::attach(registry.broker().clone(), &handle);

        Ok(Self {
            room_id: room_id.to_string(),
            user_id,
            backend,
            resolver,
            history,
            messages,
            presence,
            _handle: handle,
            hydrator,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Messages present when the room was loaded, oldest first.
    pub fn history(&self) -> &[EnrichedMessage] {
        &self.history
    }

    /// Next live enriched message, in the order the insert events were
    /// delivered for this room.
    pub async fn next_message(&mut self) -> Option<EnrichedMessage> {
        self.messages.recv().await
    }

    /// Validate and commit a message; the backend publishes the insert
    /// event post-commit.
    pub async fn send(&self, content: &str) -> Result<ChatMessage, RealtimeError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RealtimeError::Validation("message content is empty".into()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(RealtimeError::Validation(format!(
                "message content exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            user_id: self.user_id,
            content: content.to_string(),
            // Provisional; the store stamps the commit time.
            created_at: Utc::now(),
        };
        self.backend.commit_message(message).await
    }

    /// Announce the local participant to the room's presence channel,
    /// resolving their display identity first. Infallible: a failed
    /// lookup falls back to the anonymous identity.
    pub async fn announce(&self) {
        let (full_name, avatar_url) = self
            .resolver
            .display_name(self.user_id, ANONYMOUS_AUTHOR)
            .await;
        self.presence.announce(PresenceEntry {
            user_id: self.user_id,
            full_name,
            avatar_url,
            online_at: Utc::now(),
        });
    }

    /// Watch the room's deduplicated online set.
    pub fn presence(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.presence.watch()
    }

    pub fn online_users(&self) -> Vec<PresenceEntry> {
        self.presence.current()
    }

    pub fn leave(self) {
        // Drop tears down the hydrator, the presence tracker, and the
        // subscription.
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.hydrator.abort();
        info!(room_id = %self.room_id, "left room");
    }
}

async fn run_hydration_loop(
    mut events: broadcast::Receiver<ChannelEvent>,
    token: DeliveryToken,
    resolver: ProfileResolver,
    room_id: String,
    tx: mpsc::Sender<EnrichedMessage>,
) {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::MessageCreated(message)) => {
                // One single-row lookup per live event, awaited inline so
                // emissions keep the delivery order of the insert events.
                let author = match resolver.one(message.user_id).await {
                    Ok(Some(profile)) => AuthorView::from_profile(&profile),
                    Ok(None) => AuthorView::unknown(),
                    Err(err) => {
                        warn!(%err, "live profile lookup failed, using placeholder");
                        AuthorView::unknown()
                    }
                };

                // A lookup resolving after the subscription was torn down
                // must not deliver into a listener that no longer exists.
                if !token.is_live() {
                    break;
                }
                if tx.send(EnrichedMessage { message, author }).await.is_err() {
                    break;
                }
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(room_id, skipped = n, "hydration receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn enrich(message: ChatMessage, profiles: &HashMap<Uuid, baraza_types::models::ActorProfile>) -> EnrichedMessage {
    let author = profiles
        .get(&message.user_id)
        .map(AuthorView::from_profile)
        .unwrap_or_else(AuthorView::unknown);
    EnrichedMessage { message, author }
}
