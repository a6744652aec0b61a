//! Batched digest notifications.
//!
//! # Responsibility
//! - Run the digest job single-flight behind the `job_locks` row.
//! - Send at most one digest per (user, tribe) inside the rolling window.
//!
//! # Invariants
//! - The log row is written before sending; a lost insert race sends nothing.
//! - Failures for one member are logged and do not stop the run.
//! - The lock is released on every exit path once acquired.

use crate::model::notification::{NotificationKind, NotificationLogEntry};
use crate::notify::{dispatch, OutboundNotification};
use crate::repo::{
    DigestCandidate, MessageRepository, NotificationRepository, ProposalRepository, RepoResult,
    SqliteMessageRepository, SqliteNotificationRepository, SqliteProposalRepository,
    SqliteTribeRepository, TribeRepository,
};
use crate::service::context::ServiceContext;
use crate::service::error::TribeResult;
use log::{debug, info, warn};
use rusqlite::Connection;
use uuid::Uuid;

pub const DIGEST_JOB_NAME: &str = "tribe_digest";

/// Summary of one digest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestRun {
    /// Another runner held the job lock; nothing was evaluated.
    pub skipped_locked: bool,
    pub sent: u32,
    pub skipped: u32,
    /// Members whose evaluation or delivery failed.
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestDecision {
    Sent,
    Undelivered,
    Skipped(&'static str),
}

pub struct DigestService<'a> {
    conn: &'a Connection,
    ctx: ServiceContext<'a>,
}

impl<'a> DigestService<'a> {
    pub fn new(conn: &'a Connection, ctx: ServiceContext<'a>) -> Self {
        Self { conn, ctx }
    }

    pub fn run_digest(&self) -> TribeResult<DigestRun> {
        let locks = SqliteNotificationRepository::new(self.conn);
        let holder = Uuid::new_v4().simple().to_string();
        let now = self.ctx.now_ms();

        if !locks.try_acquire_job_lock(
            DIGEST_JOB_NAME,
            &holder,
            now,
            self.ctx.config.digest_lock_lease_ms,
        )? {
            info!("event=digest_run module=digest status=skip reason=locked");
            return Ok(DigestRun {
                skipped_locked: true,
                ..DigestRun::default()
            });
        }

        let result = self.deliver_all(now);
        if let Err(err) = locks.release_job_lock(DIGEST_JOB_NAME, &holder) {
            warn!(
                "event=digest_lock_release module=digest status=error error={}",
                err
            );
        }

        let run = result?;
        info!(
            "event=digest_run module=digest status=ok sent={} skipped={} failed={}",
            run.sent, run.skipped, run.failed
        );
        Ok(run)
    }

    fn deliver_all(&self, now: i64) -> TribeResult<DigestRun> {
        let candidates = SqliteTribeRepository::new(self.conn).digest_candidates()?;
        let mut run = DigestRun::default();
        for candidate in &candidates {
            match self.deliver_one(candidate, now) {
                Ok(DigestDecision::Sent) => run.sent += 1,
                Ok(DigestDecision::Undelivered) => run.failed += 1,
                Ok(DigestDecision::Skipped(reason)) => {
                    run.skipped += 1;
                    debug!(
                        "event=digest_member module=digest status=skip membership_id={} reason={}",
                        candidate.membership.id, reason
                    );
                }
                Err(err) => {
                    run.failed += 1;
                    warn!(
                        "event=digest_member module=digest status=error membership_id={} error={}",
                        candidate.membership.id, err
                    );
                }
            }
        }
        Ok(run)
    }

    fn deliver_one(&self, candidate: &DigestCandidate, now: i64) -> RepoResult<DigestDecision> {
        let membership = &candidate.membership;
        let tribe_ref = membership.tribe_id.to_string();
        let log = SqliteNotificationRepository::new(self.conn);

        let last_sent =
            log.last_sent_at(&membership.user_id, NotificationKind::TribeDigest, &tribe_ref)?;
        if last_sent.is_some_and(|sent_at| sent_at >= now - self.ctx.config.digest_window_ms) {
            return Ok(DigestDecision::Skipped("rate_limited"));
        }

        let since = [last_sent, membership.accepted_at, membership.last_read_messages_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);
        let unread_messages = SqliteMessageRepository::new(self.conn).count_messages_since(
            membership.tribe_id,
            &membership.user_id,
            since,
        )?;
        let pending = SqliteProposalRepository::new(self.conn).count_pending(membership.id)?;
        let unread = unread_messages.saturating_add(pending);
        if unread == 0 {
            return Ok(DigestDecision::Skipped("nothing_unread"));
        }

        let entry = NotificationLogEntry::new(
            membership.user_id.as_str(),
            NotificationKind::TribeDigest,
            tribe_ref,
            now,
        );
        if !log.record_sent(&entry)? {
            return Ok(DigestDecision::Skipped("already_sent"));
        }

        let notification = OutboundNotification::digest(
            membership.user_id.as_str(),
            membership.tribe_id,
            &candidate.tribe_name,
            unread,
        );
        Ok(if dispatch(self.ctx.notifier, &notification) {
            DigestDecision::Sent
        } else {
            DigestDecision::Undelivered
        })
    }
}
