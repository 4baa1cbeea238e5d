use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

/// Apply the full schema.
///
/// The notification relation ships in its own migration because it is
/// rolled out incrementally across environments; the realtime layer must
/// keep working against a store where only `core` has run.
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    core(conn)?;
    notifications(conn)?;
    info!("Store migrations complete");
    Ok(())
}

/// Profiles and chat messages — the original schema, present everywhere.
pub fn core(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            full_name   TEXT,
            avatar_url  TEXT
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_room
            ON chat_messages(room_id, created_at);
        ",
    )?;
    Ok(())
}

/// The user_notifications relation. May be absent in environments where
/// this migration has not landed yet.
pub fn notifications(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user_notifications (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            source_type  TEXT NOT NULL,
            source_id    TEXT,
            actor_id     TEXT,
            title        TEXT NOT NULL,
            message      TEXT NOT NULL,
            link         TEXT,
            image_url    TEXT,
            metadata     TEXT NOT NULL DEFAULT '{}',
            priority     TEXT NOT NULL DEFAULT 'normal',
            category     TEXT NOT NULL,
            is_read      INTEGER NOT NULL DEFAULT 0,
            read_at      TEXT,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            archived_at  TEXT,
            is_dismissed INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            expires_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_user_notifications_user
            ON user_notifications(user_id, created_at);
        ",
    )?;
    Ok(())
}
