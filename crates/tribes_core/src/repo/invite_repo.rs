//! Invite token persistence and atomic redemption.
//!
//! # Responsibility
//! - Store shareable and SMS invite tokens.
//! - Redeem a token and activate the membership in one transaction.
//!
//! # Invariants
//! - A use is consumed only by the conditional increment
//!   `used_count = used_count + 1 WHERE used_count < max_uses AND not expired`.
//! - Rejected redemptions (unknown, deleted tribe, already a member,
//!   expired, exhausted) consume nothing.

use crate::model::invite::InviteToken;
use crate::model::permission::PermissionSet;
use crate::model::tribe::{Membership, Tribe, TribeId};
use crate::repo::tribe_repo::{insert_membership_row, SqliteTribeRepository, TribeRepository};
use crate::repo::{begin_immediate, parse_uuid, to_u32, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TOKEN_SELECT_SQL: &str = "SELECT
    id,
    tribe_id,
    token,
    created_by,
    max_uses,
    used_count,
    expires_at,
    created_at
FROM tribe_invite_tokens";

/// Result of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Joined {
        tribe: Tribe,
        membership: Membership,
    },
    NotFound,
    TribeDeleted,
    AlreadyMember,
    Expired,
    Exhausted,
}

pub trait InviteRepository {
    fn insert_token(&self, token: &InviteToken) -> RepoResult<()>;
    fn find_token(&self, token: &str) -> RepoResult<Option<InviteToken>>;
    fn list_tokens(&self, tribe_id: TribeId) -> RepoResult<Vec<InviteToken>>;
    /// Consumes one use of `token` and makes `user_id` an active member.
    fn redeem_token(&self, token: &str, user_id: &str, now_ms: i64) -> RepoResult<RedeemOutcome>;
}

pub struct SqliteInviteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteInviteRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl InviteRepository for SqliteInviteRepository<'_> {
    fn insert_token(&self, token: &InviteToken) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tribe_invite_tokens (
                id,
                tribe_id,
                token,
                created_by,
                max_uses,
                used_count,
                expires_at,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                token.id.to_string(),
                token.tribe_id.to_string(),
                token.token.as_str(),
                token.created_by.as_str(),
                token.max_uses,
                token.used_count,
                token.expires_at,
                token.created_at,
            ],
        )?;
        Ok(())
    }

    fn find_token(&self, token: &str) -> RepoResult<Option<InviteToken>> {
        find_token_row(self.conn, token)
    }

    fn list_tokens(&self, tribe_id: TribeId) -> RepoResult<Vec<InviteToken>> {
        let sql = format!("{TOKEN_SELECT_SQL} WHERE tribe_id = ?1 ORDER BY created_at DESC;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([tribe_id.to_string()])?;
        let mut tokens = Vec::new();
        while let Some(row) = rows.next()? {
            tokens.push(parse_token_row(row)?);
        }
        Ok(tokens)
    }

    fn redeem_token(&self, token: &str, user_id: &str, now_ms: i64) -> RepoResult<RedeemOutcome> {
        let tx = begin_immediate(self.conn)?;

        let Some(invite) = find_token_row(&tx, token)? else {
            return Ok(RedeemOutcome::NotFound);
        };

        let tribes = SqliteTribeRepository::new(&tx);
        let Some(tribe) = tribes.get_tribe(invite.tribe_id)? else {
            return Ok(RedeemOutcome::NotFound);
        };
        if tribe.is_deleted() {
            return Ok(RedeemOutcome::TribeDeleted);
        }

        let existing = tribes.find_membership(tribe.id, user_id)?;
        if existing.as_ref().is_some_and(Membership::is_active) {
            return Ok(RedeemOutcome::AlreadyMember);
        }

        let consumed = tx.execute(
            "UPDATE tribe_invite_tokens
             SET used_count = used_count + 1
             WHERE id = ?1
               AND (max_uses IS NULL OR used_count < max_uses)
               AND (expires_at IS NULL OR expires_at > ?2);",
            params![invite.id.to_string(), now_ms],
        )?;
        if consumed == 0 {
            return Ok(if invite.is_expired_at(now_ms) {
                RedeemOutcome::Expired
            } else {
                RedeemOutcome::Exhausted
            });
        }

        let membership = match existing {
            Some(mut membership) if membership.left_at.is_some() => {
                tribes.rejoin_membership(membership.id, &invite.created_by, now_ms)?;
                membership.invited_by = invite.created_by.clone();
                membership.invited_at = now_ms;
                membership.accepted_at = Some(now_ms);
                membership.left_at = None;
                membership
            }
            Some(mut membership) => {
                tribes.accept_membership(membership.id, now_ms)?;
                membership.accepted_at = Some(now_ms);
                membership
            }
            None => {
                let mut membership = Membership::invited(
                    tribe.id,
                    user_id,
                    invite.created_by.as_str(),
                    PermissionSet::default(),
                    now_ms,
                );
                membership.accepted_at = Some(now_ms);
                insert_membership_row(&tx, &membership)?;
                membership
            }
        };

        tx.commit()?;
        Ok(RedeemOutcome::Joined { tribe, membership })
    }
}

fn find_token_row(conn: &Connection, token: &str) -> RepoResult<Option<InviteToken>> {
    let sql = format!("{TOKEN_SELECT_SQL} WHERE token = ?1;");
    conn.query_row(&sql, [token], |row| Ok(parse_token_row(row)))
        .optional()?
        .transpose()
}

fn parse_token_row(row: &Row<'_>) -> RepoResult<InviteToken> {
    let id_text: String = row.get(0)?;
    let tribe_text: String = row.get(1)?;
    let max_uses: Option<i64> = row.get(4)?;
    let used_count: i64 = row.get(5)?;
    Ok(InviteToken {
        id: parse_uuid(&id_text, "tribe_invite_tokens.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_invite_tokens.tribe_id")?,
        token: row.get(2)?,
        created_by: row.get(3)?,
        max_uses: max_uses
            .map(|value| to_u32(value, "tribe_invite_tokens.max_uses"))
            .transpose()?,
        used_count: to_u32(used_count, "tribe_invite_tokens.used_count")?,
        expires_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}
