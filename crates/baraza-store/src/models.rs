//! Database row types — these map directly to SQLite rows.
//! Distinct from the baraza-types models to keep the store layer's
//! text-encoded columns out of the rest of the workspace.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use baraza_types::models::{ActorProfile, ChatMessage};
use baraza_types::notifications::{Notification, Priority, SourceType};

use crate::StoreError;

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub source_type: String,
    pub source_id: Option<String>,
    pub actor_id: Option<String>,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub metadata: String,
    pub priority: String,
    pub category: String,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub is_archived: bool,
    pub archived_at: Option<String>,
    pub is_dismissed: bool,
    pub created_at: String,
    pub expires_at: Option<String>,
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::MalformedRow(format!("{field}: {value}")))
}

pub(crate) fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::MalformedRow(format!("{field}: {value}")))
}

fn parse_opt_ts(field: &str, value: &Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(|v| parse_ts(field, v)).transpose()
}

impl MessageRow {
    pub fn into_message(self) -> Result<ChatMessage, StoreError> {
        Ok(ChatMessage {
            id: parse_uuid("id", &self.id)?,
            room_id: self.room_id,
            user_id: parse_uuid("user_id", &self.user_id)?,
            content: self.content,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<ActorProfile, StoreError> {
        Ok(ActorProfile {
            id: parse_uuid("id", &self.id)?,
            full_name: self.full_name,
            avatar_url: self.avatar_url,
        })
    }
}

impl NotificationRow {
    pub fn into_notification(self) -> Result<Notification, StoreError> {
        let source_type = SourceType::parse(&self.source_type).ok_or_else(|| {
            StoreError::MalformedRow(format!("source_type: {}", self.source_type))
        })?;
        let priority = Priority::parse(&self.priority)
            .ok_or_else(|| StoreError::MalformedRow(format!("priority: {}", self.priority)))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|_| StoreError::MalformedRow(format!("metadata: {}", self.metadata)))?;

        Ok(Notification {
            id: parse_uuid("id", &self.id)?,
            user_id: parse_uuid("user_id", &self.user_id)?,
            source_type,
            source_id: self.source_id,
            actor_id: self
                .actor_id
                .as_deref()
                .map(|v| parse_uuid("actor_id", v))
                .transpose()?,
            title: self.title,
            message: self.message,
            link: self.link,
            image_url: self.image_url,
            metadata,
            priority,
            category: self.category,
            is_read: self.is_read,
            read_at: parse_opt_ts("read_at", &self.read_at)?,
            is_archived: self.is_archived,
            archived_at: parse_opt_ts("archived_at", &self.archived_at)?,
            is_dismissed: self.is_dismissed,
            created_at: parse_ts("created_at", &self.created_at)?,
            expires_at: parse_opt_ts("expires_at", &self.expires_at)?,
        })
    }
}
