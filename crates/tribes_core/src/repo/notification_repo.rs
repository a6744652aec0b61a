//! Notification log and job lock persistence.
//!
//! # Invariants
//! - `(user_id, reference_id, kind, day_bucket)` is unique; a second insert
//!   for the same bucket is a no-op and reports `false`.
//! - A job lock is held by at most one holder; a lock older than the lease
//!   may be taken over in a single statement.

use crate::model::notification::{NotificationKind, NotificationLogEntry};
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection};

pub trait NotificationRepository {
    /// Latest `sent_at` for `(user, kind, reference)`.
    fn last_sent_at(
        &self,
        user_id: &str,
        kind: NotificationKind,
        reference_id: &str,
    ) -> RepoResult<Option<i64>>;
    /// Inserts the log row. Returns `false` if the day bucket is already taken.
    fn record_sent(&self, entry: &NotificationLogEntry) -> RepoResult<bool>;
    fn list_sent(&self, user_id: &str) -> RepoResult<Vec<NotificationLogEntry>>;
    /// Acquires `job_name` for `holder`, taking over locks older than
    /// `lease_ms`. Returns `false` if another holder keeps it.
    fn try_acquire_job_lock(
        &self,
        job_name: &str,
        holder: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> RepoResult<bool>;
    fn release_job_lock(&self, job_name: &str, holder: &str) -> RepoResult<()>;
}

pub struct SqliteNotificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl NotificationRepository for SqliteNotificationRepository<'_> {
    fn last_sent_at(
        &self,
        user_id: &str,
        kind: NotificationKind,
        reference_id: &str,
    ) -> RepoResult<Option<i64>> {
        let sent_at: Option<i64> = self.conn.query_row(
            "SELECT MAX(sent_at)
             FROM notification_log
             WHERE user_id = ?1
               AND kind = ?2
               AND reference_id = ?3;",
            params![user_id, kind.as_str(), reference_id],
            |row| row.get(0),
        )?;
        Ok(sent_at)
    }

    fn record_sent(&self, entry: &NotificationLogEntry) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO notification_log (id, user_id, kind, reference_id, sent_at, day_bucket)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, reference_id, kind, day_bucket) DO NOTHING;",
            params![
                entry.id.to_string(),
                entry.user_id.as_str(),
                entry.kind.as_str(),
                entry.reference_id.as_str(),
                entry.sent_at,
                entry.day_bucket,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn list_sent(&self, user_id: &str) -> RepoResult<Vec<NotificationLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, reference_id, sent_at, day_bucket
             FROM notification_log
             WHERE user_id = ?1
             ORDER BY sent_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([user_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            let kind_text: String = row.get(2)?;
            let kind = NotificationKind::parse(&kind_text).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid notification kind `{kind_text}` in notification_log.kind"
                ))
            })?;
            entries.push(NotificationLogEntry {
                id: parse_uuid(&id_text, "notification_log.id")?,
                user_id: row.get(1)?,
                kind,
                reference_id: row.get(3)?,
                sent_at: row.get(4)?,
                day_bucket: row.get(5)?,
            });
        }
        Ok(entries)
    }

    fn try_acquire_job_lock(
        &self,
        job_name: &str,
        holder: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT INTO job_locks (job_name, holder, acquired_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (job_name) DO UPDATE
                SET holder = excluded.holder,
                    acquired_at = excluded.acquired_at
                WHERE job_locks.acquired_at <= ?3 - ?4;",
            params![job_name, holder, now_ms, lease_ms],
        )?;
        Ok(changed == 1)
    }

    fn release_job_lock(&self, job_name: &str, holder: &str) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM job_locks WHERE job_name = ?1 AND holder = ?2;",
            params![job_name, holder],
        )?;
        Ok(())
    }
}
