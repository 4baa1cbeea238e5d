use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use baraza_types::models::{ActorProfile, ChatMessage};
use baraza_types::notifications::{Notification, NotificationFilters};

use crate::models::{MessageRow, NotificationRow, ProfileRow};
use crate::{Store, StoreError};

const NOTIFICATION_COLS: &str = "id, user_id, source_type, source_id, actor_id, title, message, \
     link, image_url, metadata, priority, category, is_read, read_at, is_archived, archived_at, \
     is_dismissed, created_at, expires_at";

/// Fixed-width timestamp encoding so the TEXT column sorts in time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    // -- Messages --

    /// Commit a message row and return it as stored. `created_at` is
    /// stamped here, under the connection lock, so timestamp order always
    /// agrees with commit order; the caller's provisional value is
    /// discarded.
    pub fn insert_message(&self, msg: &ChatMessage) -> Result<ChatMessage, StoreError> {
        self.with_conn(|conn| {
            // Truncated to the column's precision so the returned row is
            // identical to what a later read yields.
            let created_at = Utc::now().trunc_subsecs(6);
            conn.execute(
                "INSERT INTO chat_messages (id, room_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    msg.id.to_string(),
                    msg.room_id,
                    msg.user_id.to_string(),
                    msg.content,
                    ts(&created_at),
                ],
            )?;
            Ok(ChatMessage {
                created_at,
                ..msg.clone()
            })
        })
    }

    /// The `limit` most recent messages of a room, returned oldest-first.
    /// Ties on created_at fall back to insertion order (rowid).
    pub fn recent_messages(&self, room_id: &str, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(|conn| query_recent_messages(conn, room_id, limit))
    }

    // -- Profiles --

    pub fn upsert_profile(&self, profile: &ActorProfile) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, avatar_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET full_name = ?2, avatar_url = ?3",
                rusqlite::params![profile.id.to_string(), profile.full_name, profile.avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn profile_by_id(&self, id: Uuid) -> Result<Option<ActorProfile>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, full_name, avatar_url FROM profiles WHERE id = ?1",
                    [id.to_string()],
                    profile_row,
                )
                .optional()?;
            row.map(ProfileRow::into_profile).transpose()
        })
    }

    /// Batch-fetch profiles for a set of actor ids in one query.
    pub fn profiles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ActorProfile>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id, full_name, avatar_url FROM profiles WHERE id IN ({})",
                placeholders.join(", ")
            );

            let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = id_strings
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), profile_row)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(ProfileRow::into_profile).collect()
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, n: &Notification) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO user_notifications ({NOTIFICATION_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                ),
                rusqlite::params![
                    n.id.to_string(),
                    n.user_id.to_string(),
                    n.source_type.as_str(),
                    n.source_id,
                    n.actor_id.map(|id| id.to_string()),
                    n.title,
                    n.message,
                    n.link,
                    n.image_url,
                    n.metadata.to_string(),
                    n.priority.as_str(),
                    n.category,
                    n.is_read,
                    n.read_at.as_ref().map(ts),
                    n.is_archived,
                    n.archived_at.as_ref().map(ts),
                    n.is_dismissed,
                    ts(&n.created_at),
                    n.expires_at.as_ref().map(ts),
                ],
            )?;
            Ok(())
        })
    }

    pub fn notification_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {NOTIFICATION_COLS} FROM user_notifications WHERE id = ?1"),
                    [id.to_string()],
                    notification_row,
                )
                .optional()?;
            row.map(NotificationRow::into_notification).transpose()
        })
    }

    /// Transition to read. Idempotent: a second call matches no rows and
    /// leaves read_at untouched. Returns whether a row changed.
    pub fn mark_read(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_notifications SET is_read = 1, read_at = ?1
                 WHERE id = ?2 AND is_read = 0",
                rusqlite::params![ts(&Utc::now()), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Bulk variant over an explicit id list. Returns the number of rows
    /// that actually transitioned.
    pub fn mark_read_many(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let now = ts(&Utc::now());
            let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "UPDATE user_notifications SET is_read = 1, read_at = ?1
                 WHERE id IN ({}) AND is_read = 0",
                placeholders.join(", ")
            );

            let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&now];
            params.extend(id_strings.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let changed = conn.execute(&sql, params.as_slice())?;
            Ok(changed as u64)
        })
    }

    /// Every active unread notification of the user transitions to read.
    pub fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_notifications SET is_read = 1, read_at = ?1
                 WHERE user_id = ?2 AND is_read = 0 AND is_archived = 0",
                rusqlite::params![ts(&Utc::now()), user_id.to_string()],
            )?;
            Ok(changed as u64)
        })
    }

    /// Soft delete: excluded from listing and the unread count from now on.
    pub fn archive_notification(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_notifications SET is_archived = 1, archived_at = ?1
                 WHERE id = ?2 AND is_archived = 0",
                rusqlite::params![ts(&Utc::now()), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Sets the dismissed flag only; read and archive state are untouched.
    pub fn dismiss_notification(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_notifications SET is_dismissed = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Active (non-archived) notifications, newest first.
    pub fn list_notifications(
        &self,
        user_id: Uuid,
        filters: &NotificationFilters,
    ) -> Result<Vec<Notification>, StoreError> {
        self.with_conn(|conn| query_notifications(conn, user_id, filters))
    }

    pub fn unread_count(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM user_notifications
                 WHERE user_id = ?1 AND is_read = 0 AND is_archived = 0",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn query_recent_messages(
    conn: &Connection,
    room_id: &str,
    limit: u32,
) -> Result<Vec<ChatMessage>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, room_id, user_id, content, created_at
         FROM chat_messages
         WHERE room_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![room_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room_id: row.get(1)?,
                user_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Fetched newest-first to apply the limit; callers want oldest-first.
    rows.reverse();
    rows.into_iter().map(MessageRow::into_message).collect()
}

fn query_notifications(
    conn: &Connection,
    user_id: Uuid,
    filters: &NotificationFilters,
) -> Result<Vec<Notification>, StoreError> {
    let uid = user_id.to_string();
    let mut sql = format!(
        "SELECT {NOTIFICATION_COLS} FROM user_notifications
         WHERE user_id = ? AND is_archived = 0"
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(uid)];

    if let Some(is_read) = filters.is_read {
        sql.push_str(" AND is_read = ?");
        params.push(Box::new(is_read));
    }
    if let Some(source_type) = filters.source_type {
        sql.push_str(" AND source_type = ?");
        params.push(Box::new(source_type.as_str()));
    }
    if let Some(priority) = filters.priority {
        sql.push_str(" AND priority = ?");
        params.push(Box::new(priority.as_str()));
    }
    if let Some(category) = &filters.category {
        sql.push_str(" AND category = ?");
        params.push(Box::new(category.clone()));
    }

    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    if let Some(limit) = filters.limit {
        sql.push_str(" LIMIT ?");
        params.push(Box::new(limit));
    }

    let refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(refs.as_slice(), notification_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(NotificationRow::into_notification)
        .collect()
}

fn profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        avatar_url: row.get(2)?,
    })
}

fn notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source_type: row.get(2)?,
        source_id: row.get(3)?,
        actor_id: row.get(4)?,
        title: row.get(5)?,
        message: row.get(6)?,
        link: row.get(7)?,
        image_url: row.get(8)?,
        metadata: row.get(9)?,
        priority: row.get(10)?,
        category: row.get(11)?,
        is_read: row.get(12)?,
        read_at: row.get(13)?,
        is_archived: row.get(14)?,
        archived_at: row.get(15)?,
        is_dismissed: row.get(16)?,
        created_at: row.get(17)?,
        expires_at: row.get(18)?,
    })
}
