//! Tribe message and activity feed persistence.
//!
//! # Invariants
//! - Deleted messages (`deleted_at` set) never count as unread.
//! - A member's own messages never count as unread for that member.

use crate::model::feed::{ActivityKind, TribeActivity, TribeMessage};
use crate::model::tribe::TribeId;
use crate::repo::{parse_uuid, to_u32, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const MESSAGE_SELECT_SQL: &str = "SELECT
    id,
    tribe_id,
    user_id,
    body,
    created_at,
    deleted_at
FROM tribe_messages";

const ACTIVITY_SELECT_SQL: &str = "SELECT
    id,
    tribe_id,
    kind,
    message,
    created_by,
    created_at
FROM tribe_activities";

pub trait MessageRepository {
    fn insert_message(&self, message: &TribeMessage) -> RepoResult<()>;
    /// Live messages, newest first.
    fn list_messages(&self, tribe_id: TribeId, limit: u32) -> RepoResult<Vec<TribeMessage>>;
    /// Live messages by others created strictly after `since`.
    fn count_messages_since(&self, tribe_id: TribeId, reader_id: &str, since: i64)
        -> RepoResult<u32>;
    fn insert_activity(&self, activity: &TribeActivity) -> RepoResult<()>;
    /// Activity feed, newest first.
    fn list_activities(&self, tribe_id: TribeId, limit: u32) -> RepoResult<Vec<TribeActivity>>;
}

pub struct SqliteMessageRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMessageRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MessageRepository for SqliteMessageRepository<'_> {
    fn insert_message(&self, message: &TribeMessage) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tribe_messages (id, tribe_id, user_id, body, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                message.id.to_string(),
                message.tribe_id.to_string(),
                message.user_id.as_str(),
                message.body.as_str(),
                message.created_at,
                message.deleted_at,
            ],
        )?;
        Ok(())
    }

    fn list_messages(&self, tribe_id: TribeId, limit: u32) -> RepoResult<Vec<TribeMessage>> {
        let sql = format!(
            "{MESSAGE_SELECT_SQL}
             WHERE tribe_id = ?1
               AND deleted_at IS NULL
             ORDER BY created_at DESC, id ASC
             LIMIT ?2;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![tribe_id.to_string(), i64::from(limit)])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(parse_message_row(row)?);
        }
        Ok(messages)
    }

    fn count_messages_since(
        &self,
        tribe_id: TribeId,
        reader_id: &str,
        since: i64,
    ) -> RepoResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM tribe_messages
             WHERE tribe_id = ?1
               AND user_id <> ?2
               AND deleted_at IS NULL
               AND created_at > ?3;",
            params![tribe_id.to_string(), reader_id, since],
            |row| row.get(0),
        )?;
        to_u32(count, "tribe_messages count")
    }

    fn insert_activity(&self, activity: &TribeActivity) -> RepoResult<()> {
        insert_activity(self.conn, activity)
    }

    fn list_activities(&self, tribe_id: TribeId, limit: u32) -> RepoResult<Vec<TribeActivity>> {
        let sql = format!(
            "{ACTIVITY_SELECT_SQL}
             WHERE tribe_id = ?1
             ORDER BY created_at DESC, id ASC
             LIMIT ?2;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![tribe_id.to_string(), i64::from(limit)])?;
        let mut activities = Vec::new();
        while let Some(row) = rows.next()? {
            activities.push(parse_activity_row(row)?);
        }
        Ok(activities)
    }
}

pub(crate) fn insert_activity(conn: &Connection, activity: &TribeActivity) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO tribe_activities (id, tribe_id, kind, message, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            activity.id.to_string(),
            activity.tribe_id.to_string(),
            activity.kind.as_str(),
            activity.message.as_str(),
            activity.created_by.as_deref(),
            activity.created_at,
        ],
    )?;
    Ok(())
}

fn parse_message_row(row: &Row<'_>) -> RepoResult<TribeMessage> {
    let id_text: String = row.get(0)?;
    let tribe_text: String = row.get(1)?;
    Ok(TribeMessage {
        id: parse_uuid(&id_text, "tribe_messages.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_messages.tribe_id")?,
        user_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

fn parse_activity_row(row: &Row<'_>) -> RepoResult<TribeActivity> {
    let id_text: String = row.get(0)?;
    let tribe_text: String = row.get(1)?;
    let kind_text: String = row.get(2)?;
    let kind = ActivityKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid activity kind `{kind_text}` in tribe_activities.kind"
        ))
    })?;
    Ok(TribeActivity {
        id: parse_uuid(&id_text, "tribe_activities.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_activities.tribe_id")?,
        kind,
        message: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}
