use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use baraza_realtime::{
    Backend, Broker, ChannelRegistry, NotificationDispatcher, RoomSession,
};
use baraza_store::Store;
use baraza_types::events::{self, ChannelEvent};
use baraza_types::models::ActorProfile;
use baraza_types::notifications::{NotificationDraft, NotificationFilters, SourceType};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct World {
    store: Arc<Store>,
    broker: Broker,
    backend: Backend,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "baraza=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

impl World {
    fn new() -> Self {
        init_tracing();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let broker = Broker::new();
        let backend = Backend::new(store.clone(), broker.clone());
        Self {
            store,
            broker,
            backend,
        }
    }

    /// Each client session owns its own registry over the shared broker.
    fn client(&self) -> ChannelRegistry {
        ChannelRegistry::new(self.broker.clone())
    }

    fn user_with_profile(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .upsert_profile(&ActorProfile {
                id,
                full_name: Some(name.to_string()),
                avatar_url: None,
            })
            .unwrap();
        id
    }
}

async fn join(world: &World, registry: &ChannelRegistry, user: Uuid, room: &str) -> RoomSession {
    RoomSession::join(registry, world.backend.clone(), user, room, 100)
        .await
        .unwrap()
}

#[tokio::test]
async fn subscriber_receives_exactly_one_enriched_message() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");

    let mut session_b = join(&world, &world.client(), bob, "general").await;
    assert!(session_b.history().is_empty());

    let session_a = join(&world, &world.client(), alice, "general").await;
    session_a.send("hello").await.unwrap();

    let received = timeout(WAIT, session_b.next_message()).await.unwrap().unwrap();
    assert_eq!(received.message.content, "hello");
    assert_eq!(received.message.user_id, alice);
    assert_eq!(received.author.full_name, "Alice Auma");

    // Exactly once: nothing else arrives.
    assert!(timeout(QUIET, session_b.next_message()).await.is_err());
}

#[tokio::test]
async fn enrichment_falls_back_to_unknown_author() {
    let world = World::new();
    let ghost = Uuid::new_v4(); // no profile row
    let bob = world.user_with_profile("Bob Otieno");

    let mut session_b = join(&world, &world.client(), bob, "general").await;
    let session_ghost = join(&world, &world.client(), ghost, "general").await;
    session_ghost.send("still here").await.unwrap();

    let received = timeout(WAIT, session_b.next_message()).await.unwrap().unwrap();
    assert_eq!(received.author.full_name, "Unknown");
    assert!(received.author.avatar_url.is_none());
}

#[tokio::test]
async fn backfill_is_oldest_first_and_batch_enriched() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let ghost = Uuid::new_v4();

    let writer = join(&world, &world.client(), alice, "general").await;
    writer.send("one").await.unwrap();
    writer.send("two").await.unwrap();
    drop(writer);
    let ghost_writer = join(&world, &world.client(), ghost, "general").await;
    ghost_writer.send("three").await.unwrap();
    ghost_writer.leave();

    let session = join(&world, &world.client(), alice, "general").await;
    let history = session.history();
    let contents: Vec<&str> = history.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, ["one", "two", "three"]);
    assert_eq!(history[0].author.full_name, "Alice Auma");
    assert_eq!(history[2].author.full_name, "Unknown");

    for pair in history.windows(2) {
        assert!(pair[0].message.created_at <= pair[1].message.created_at);
    }
}

#[tokio::test]
async fn live_stream_preserves_room_commit_order() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");

    let mut session_b = join(&world, &world.client(), bob, "general").await;
    let session_a = join(&world, &world.client(), alice, "general").await;

    for i in 0..5 {
        session_a.send(&format!("m{i}")).await.unwrap();
    }

    let mut last = None;
    for i in 0..5 {
        let received = timeout(WAIT, session_b.next_message()).await.unwrap().unwrap();
        assert_eq!(received.message.content, format!("m{i}"));
        if let Some(prev) = last {
            assert!(received.message.created_at >= prev);
        }
        last = Some(received.message.created_at);
    }
}

#[tokio::test]
async fn message_validation_rejects_before_any_write() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let session = join(&world, &world.client(), alice, "general").await;

    assert!(session.send("   ").await.is_err());
    assert!(session.send(&"x".repeat(1001)).await.is_err());

    assert!(world.store.recent_messages("general", 10).unwrap().is_empty());
}

#[tokio::test]
async fn presence_dedupes_one_identity_across_connections() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");

    let session_b = join(&world, &world.client(), bob, "general").await;

    // Alice is online twice (two devices, two client sessions).
    let alice_phone = join(&world, &world.client(), alice, "general").await;
    let alice_laptop = join(&world, &world.client(), alice, "general").await;
    alice_phone.announce().await;
    alice_laptop.announce().await;
    session_b.announce().await;

    let mut view = session_b.presence();
    let online = timeout(WAIT, view.wait_for(|v| v.len() == 2))
        .await
        .unwrap()
        .unwrap()
        .clone();

    let alice_entries: Vec<_> = online.iter().filter(|e| e.user_id == alice).collect();
    assert_eq!(alice_entries.len(), 1);
    assert_eq!(alice_entries[0].full_name, "Alice Auma");
    assert!(online.iter().any(|e| e.user_id == bob));
}

#[tokio::test]
async fn presence_entry_disappears_when_the_connection_leaves() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");

    let session_b = join(&world, &world.client(), bob, "general").await;
    let session_a = join(&world, &world.client(), alice, "general").await;
    session_a.announce().await;

    let mut view = session_b.presence();
    timeout(WAIT, view.wait_for(|v| v.len() == 1)).await.unwrap().unwrap();

    session_a.leave();
    let online = timeout(WAIT, view.wait_for(|v| v.is_empty()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(online.is_empty());
}

#[tokio::test]
async fn superseded_session_cannot_reannounce_presence() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");
    let registry = world.client();

    let observer = join(&world, &world.client(), bob, "general").await;
    let stale = join(&world, &registry, alice, "general").await;
    let fresh = join(&world, &registry, alice, "general").await;

    // The superseded session announcing must not re-register a connection
    // the registry already untracked.
    stale.announce().await;
    fresh.announce().await;

    let mut view = observer.presence();
    timeout(WAIT, view.wait_for(|v| v.iter().any(|e| e.user_id == alice)))
        .await
        .unwrap()
        .unwrap();

    // Once both of alice's sessions are gone, no ghost entry survives.
    drop(stale);
    drop(fresh);
    timeout(WAIT, view.wait_for(|v| v.iter().all(|e| e.user_id != alice)))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn rejoining_a_room_replaces_the_old_session() {
    let world = World::new();
    let alice = world.user_with_profile("Alice Auma");
    let bob = world.user_with_profile("Bob Otieno");
    let registry = world.client();

    let mut stale = join(&world, &registry, bob, "general").await;
    let mut fresh = join(&world, &registry, bob, "general").await;

    let sender = join(&world, &world.client(), alice, "general").await;
    sender.send("after rejoin").await.unwrap();

    let received = timeout(WAIT, fresh.next_message()).await.unwrap().unwrap();
    assert_eq!(received.message.content, "after rejoin");

    // The superseded session delivers nothing, even though the event
    // reached its transport-level receiver.
    match timeout(QUIET, stale.next_message()).await {
        Ok(None) | Err(_) => {}
        Ok(Some(m)) => panic!("stale session delivered {:?}", m.message.content),
    }
}

#[tokio::test]
async fn notification_feed_delivers_the_full_row_exactly_once() {
    let world = World::new();
    let user = Uuid::new_v4();
    let registry = world.client();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), registry);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let feed = dispatcher
        .subscribe(user, move |n| {
            let _ = tx.send(n);
        })
        .unwrap();

    let id = dispatcher
        .create(
            user,
            SourceType::BillUpdate,
            "Bill moved to second reading",
            "The Finance Bill was scheduled for debate.",
            NotificationDraft {
                link: Some("/bills/42".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("relation is deployed");

    let delivered = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.id, id);
    assert_eq!(delivered.source_type, SourceType::BillUpdate);
    assert_eq!(delivered.link.as_deref(), Some("/bills/42"));
    assert_eq!(delivered.category, "civic");
    assert!(!delivered.is_read);

    assert!(timeout(QUIET, rx.recv()).await.is_err());
    feed.unsubscribe();
}

#[tokio::test]
async fn unread_count_tracks_archive_transitions() {
    let world = World::new();
    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), world.client());

    let mut unread_ids = Vec::new();
    for i in 0..3 {
        let id = dispatcher
            .create(user, SourceType::System, &format!("n{i}"), "body", NotificationDraft::default())
            .await
            .unwrap()
            .unwrap();
        unread_ids.push(id);
    }
    let archived = dispatcher
        .create(user, SourceType::System, "old", "body", NotificationDraft::default())
        .await
        .unwrap()
        .unwrap();
    dispatcher.archive(archived).await.unwrap();

    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 3);

    dispatcher.archive(unread_ids[0]).await.unwrap();
    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 2);

    let listed = dispatcher
        .list(user, NotificationFilters::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|n| !n.is_read && !n.is_archived));
}

#[tokio::test]
async fn read_transitions_converge_and_stay_idempotent() {
    let world = World::new();
    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), world.client());

    let id = dispatcher
        .create(user, SourceType::ChatMention, "mention", "you were mentioned", NotificationDraft::default())
        .await
        .unwrap()
        .unwrap();
    dispatcher
        .create(user, SourceType::System, "other", "body", NotificationDraft::default())
        .await
        .unwrap()
        .unwrap();

    assert!(dispatcher.mark_as_read(id).await.unwrap());
    assert!(!dispatcher.mark_as_read(id).await.unwrap());
    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 1);

    dispatcher.mark_all_as_read(user).await.unwrap();
    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_relation_degrades_every_operation() {
    let world = World::new();
    world
        .store
        .with_conn(|conn| {
            conn.execute_batch("DROP TABLE user_notifications")?;
            Ok(())
        })
        .unwrap();

    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), world.client());

    assert!(dispatcher.list(user, NotificationFilters::default()).await.unwrap().is_empty());
    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 0);
    assert!(!dispatcher.mark_as_read(Uuid::new_v4()).await.unwrap());
    assert_eq!(dispatcher.mark_all_as_read(user).await.unwrap(), 0);
    assert!(!dispatcher.archive(Uuid::new_v4()).await.unwrap());
    assert!(!dispatcher.dismiss(Uuid::new_v4()).await.unwrap());

    // Create degrades to a no-op: no id, no event published.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _feed = dispatcher
        .subscribe(user, move |n| {
            let _ = tx.send(n);
        })
        .unwrap();
    let created = dispatcher
        .create(user, SourceType::System, "t", "m", NotificationDraft::default())
        .await
        .unwrap();
    assert!(created.is_none());
    assert!(timeout(QUIET, rx.recv()).await.is_err());

    // Even a spurious insert event is absorbed, not escalated.
    world.broker.publish(
        &events::user_notifications_topic(user),
        ChannelEvent::NotificationCreated {
            id: Uuid::new_v4(),
            user_id: user,
        },
    );
    assert!(timeout(QUIET, rx.recv()).await.is_err());
}

#[tokio::test]
async fn notification_validation_rejects_before_any_write() {
    let world = World::new();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), world.client());
    let user = Uuid::new_v4();

    assert!(dispatcher
        .create(user, SourceType::System, "  ", "body", NotificationDraft::default())
        .await
        .is_err());
    assert!(dispatcher
        .create(user, SourceType::System, "title", "", NotificationDraft::default())
        .await
        .is_err());

    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 0);
    assert!(dispatcher
        .list(user, NotificationFilters::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn dismissal_is_visibility_only() {
    let world = World::new();
    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(world.backend.clone(), world.client());

    let id = dispatcher
        .create(user, SourceType::DiscussionReply, "reply", "body", NotificationDraft::default())
        .await
        .unwrap()
        .unwrap();

    assert!(dispatcher.dismiss(id).await.unwrap());
    assert_eq!(dispatcher.unread_count(user).await.unwrap(), 1);

    let row = world.store.notification_by_id(id).unwrap().unwrap();
    assert!(row.is_dismissed);
    assert!(!row.is_read);
    assert!(!row.is_archived);

    let listed = dispatcher
        .list(user, NotificationFilters::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_dismissed);
}
