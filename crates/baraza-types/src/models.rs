use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name substituted when a message author has no profile row.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Display name used when announcing presence without a profile row.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// A chat message as stored and as carried on the room topic.
/// Append-only: never mutated or deleted by this core. Ordering key is
/// `created_at`, with ties broken by the store's insertion sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Display metadata for an actor, fetched on demand from the profiles
/// relation. Read-only from this core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Resolved author view attached to an enriched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorView {
    pub full_name: String,
    pub avatar_url: Option<String>,
}

impl AuthorView {
    /// Placeholder used when the profile lookup misses (deleted account,
    /// relation not yet deployed). The message is never dropped.
    pub fn unknown() -> Self {
        Self {
            full_name: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        }
    }

    pub fn from_profile(profile: &ActorProfile) -> Self {
        Self {
            full_name: profile
                .full_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            avatar_url: profile.avatar_url.clone(),
        }
    }
}

/// A message joined with its author's display metadata, ready for
/// rendering. Produced by the hydration pipeline; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub author: AuthorView,
}

/// Ephemeral per-connection presence record. Exists only while the owning
/// connection is tracked; the tracker's view is rebuilt wholesale on every
/// sync snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub online_at: DateTime<Utc>,
}
