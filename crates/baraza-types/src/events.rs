use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, PresenceEntry};

/// Events carried on a logical topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    /// A message row was committed to the room this topic belongs to.
    MessageCreated(ChatMessage),

    /// A notification row was committed for the topic's user. Delivery is
    /// id-only on purpose: subscribers re-fetch the full row rather than
    /// trusting a partial event payload.
    NotificationCreated { id: Uuid, user_id: Uuid },

    /// Full current presence state of the topic: connection id -> the
    /// records tracked by that connection. Later snapshots supersede
    /// earlier ones wholesale.
    PresenceSync(BTreeMap<Uuid, Vec<PresenceEntry>>),
}

/// Topic naming convention. One chat topic per room, one private
/// notification topic per user (never shared).
pub fn room_topic(room_id: &str) -> String {
    format!("room:{room_id}")
}

pub fn user_notifications_topic(user_id: Uuid) -> String {
    format!("user-notifications:{user_id}")
}
