//! Tribe, membership and member-request persistence.
//!
//! # Responsibility
//! - CRUD over `tribes`, `tribe_members` and `tribe_member_requests`.
//! - Membership lifecycle writes guarded by their source state.
//!
//! # Invariants
//! - One `tribe_members` row per `(tribe_id, user_id)`; rejoin reuses it.
//! - Lifecycle updates carry their expected state in the `WHERE` clause and
//!   report whether a row changed.

use crate::model::feed::TribeActivity;
use crate::model::permission::PermissionSet;
use crate::model::tribe::{
    ManagementScope, MemberRequest, MemberRequestId, MemberRequestState, Membership,
    MembershipId, Tribe, TribeId, TribeType,
};
use crate::repo::message_repo::insert_activity;
use crate::repo::{
    begin_immediate, bool_to_int, int_to_bool, parse_uuid, to_u32, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

const TRIBE_SELECT_SQL: &str = "SELECT
    id,
    name,
    owner_id,
    tribe_type,
    deleted_at,
    created_at
FROM tribes";

pub(crate) const MEMBERSHIP_COLUMNS: &str = "m.id,
    m.tribe_id,
    m.user_id,
    m.invited_by,
    m.invited_at,
    m.accepted_at,
    m.left_at,
    m.management_scope,
    m.proposal_notifs,
    m.digest_notifs,
    m.last_read_messages_at,
    m.can_add_appointments,
    m.can_remove_appointments,
    m.can_add_tasks,
    m.can_remove_tasks,
    m.can_add_routines,
    m.can_remove_routines,
    m.can_add_groceries,
    m.can_remove_groceries";

const MEMBER_REQUEST_SELECT_SQL: &str = "SELECT
    id,
    tribe_id,
    requested_by,
    requested_user_id,
    state,
    created_at,
    reviewed_at,
    reviewed_by
FROM tribe_member_requests";

/// An active, digest-enabled membership in a live tribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCandidate {
    pub membership: Membership,
    pub tribe_name: String,
}

pub trait TribeRepository {
    /// Inserts the tribe and its active owner membership atomically.
    fn create_tribe(&self, tribe: &Tribe, owner: &Membership) -> RepoResult<()>;
    fn get_tribe(&self, tribe_id: TribeId) -> RepoResult<Option<Tribe>>;
    fn rename_tribe(&self, tribe_id: TribeId, name: &str) -> RepoResult<()>;
    /// Soft-deletes the tribe and records `activity` in the same transaction.
    /// Returns `false` if the tribe was already deleted.
    fn soft_delete_tribe(
        &self,
        tribe_id: TribeId,
        deleted_at: i64,
        activity: &TribeActivity,
    ) -> RepoResult<bool>;

    fn find_membership(&self, tribe_id: TribeId, user_id: &str) -> RepoResult<Option<Membership>>;
    fn get_membership(&self, membership_id: MembershipId) -> RepoResult<Option<Membership>>;
    fn insert_membership(&self, membership: &Membership) -> RepoResult<()>;
    /// Resets a left membership to invited. Returns `false` unless it was left.
    fn reinvite_membership(
        &self,
        membership_id: MembershipId,
        invited_by: &str,
        permissions: &PermissionSet,
        invited_at: i64,
    ) -> RepoResult<bool>;
    /// Marks a left membership active again with a new inviter.
    fn rejoin_membership(
        &self,
        membership_id: MembershipId,
        invited_by: &str,
        joined_at: i64,
    ) -> RepoResult<bool>;
    /// invited -> active.
    fn accept_membership(&self, membership_id: MembershipId, accepted_at: i64)
        -> RepoResult<bool>;
    /// invited|active -> left.
    fn leave_membership(&self, membership_id: MembershipId, left_at: i64) -> RepoResult<bool>;
    fn update_membership_settings(&self, membership: &Membership) -> RepoResult<()>;
    fn set_last_read_messages_at(
        &self,
        membership_id: MembershipId,
        read_at: i64,
    ) -> RepoResult<()>;

    /// Every non-left membership of `user_id` with its tribe, newest tribe first.
    fn list_memberships_for_user(&self, user_id: &str) -> RepoResult<Vec<(Tribe, Membership)>>;
    /// Invited and active memberships of a tribe, oldest invitation first.
    fn list_current_members(&self, tribe_id: TribeId) -> RepoResult<Vec<Membership>>;
    fn count_active_members(&self, tribe_id: TribeId) -> RepoResult<u32>;
    /// Active memberships keyed by user id, restricted to `user_ids`.
    fn active_memberships_for_users(
        &self,
        tribe_id: TribeId,
        user_ids: &[String],
    ) -> RepoResult<HashMap<String, Membership>>;
    fn digest_candidates(&self) -> RepoResult<Vec<DigestCandidate>>;

    fn insert_member_request(&self, request: &MemberRequest) -> RepoResult<()>;
    fn get_member_request(&self, request_id: MemberRequestId)
        -> RepoResult<Option<MemberRequest>>;
    /// pending -> approved|denied. Returns `false` if no longer pending.
    fn review_member_request(
        &self,
        request_id: MemberRequestId,
        state: MemberRequestState,
        reviewed_by: &str,
        reviewed_at: i64,
    ) -> RepoResult<bool>;
    fn list_pending_requests(&self, tribe_id: TribeId) -> RepoResult<Vec<MemberRequest>>;
}

pub struct SqliteTribeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTribeRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TribeRepository for SqliteTribeRepository<'_> {
    fn create_tribe(&self, tribe: &Tribe, owner: &Membership) -> RepoResult<()> {
        let tx = begin_immediate(self.conn)?;
        tx.execute(
            "INSERT INTO tribes (id, name, owner_id, tribe_type, deleted_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                tribe.id.to_string(),
                tribe.name.as_str(),
                tribe.owner_id.as_str(),
                tribe.tribe_type.as_str(),
                tribe.deleted_at,
                tribe.created_at,
            ],
        )?;
        insert_membership_row(&tx, owner)?;
        tx.commit()?;
        Ok(())
    }

    fn get_tribe(&self, tribe_id: TribeId) -> RepoResult<Option<Tribe>> {
        let sql = format!("{TRIBE_SELECT_SQL} WHERE id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([tribe_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_tribe_row(row, 0)?)),
            None => Ok(None),
        }
    }

    fn rename_tribe(&self, tribe_id: TribeId, name: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE tribes SET name = ?2 WHERE id = ?1 AND deleted_at IS NULL;",
            params![tribe_id.to_string(), name],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "tribe",
                id: tribe_id.to_string(),
            });
        }
        Ok(())
    }

    fn soft_delete_tribe(
        &self,
        tribe_id: TribeId,
        deleted_at: i64,
        activity: &TribeActivity,
    ) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let changed = tx.execute(
            "UPDATE tribes SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL;",
            params![tribe_id.to_string(), deleted_at],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        insert_activity(&tx, activity)?;
        tx.commit()?;
        Ok(true)
    }

    fn find_membership(&self, tribe_id: TribeId, user_id: &str) -> RepoResult<Option<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tribe_members m WHERE m.tribe_id = ?1 AND m.user_id = ?2;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![tribe_id.to_string(), user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_membership_row(row, 0)?)),
            None => Ok(None),
        }
    }

    fn get_membership(&self, membership_id: MembershipId) -> RepoResult<Option<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tribe_members m WHERE m.id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([membership_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_membership_row(row, 0)?)),
            None => Ok(None),
        }
    }

    fn insert_membership(&self, membership: &Membership) -> RepoResult<()> {
        insert_membership_row(self.conn, membership)
    }

    fn reinvite_membership(
        &self,
        membership_id: MembershipId,
        invited_by: &str,
        permissions: &PermissionSet,
        invited_at: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tribe_members
             SET
                invited_by = ?2,
                invited_at = ?3,
                accepted_at = NULL,
                left_at = NULL,
                can_add_appointments = ?4,
                can_remove_appointments = ?5,
                can_add_tasks = ?6,
                can_remove_tasks = ?7,
                can_add_routines = ?8,
                can_remove_routines = ?9,
                can_add_groceries = ?10,
                can_remove_groceries = ?11
             WHERE id = ?1
               AND left_at IS NOT NULL;",
            params![
                membership_id.to_string(),
                invited_by,
                invited_at,
                bool_to_int(permissions.can_add_appointments),
                bool_to_int(permissions.can_remove_appointments),
                bool_to_int(permissions.can_add_tasks),
                bool_to_int(permissions.can_remove_tasks),
                bool_to_int(permissions.can_add_routines),
                bool_to_int(permissions.can_remove_routines),
                bool_to_int(permissions.can_add_groceries),
                bool_to_int(permissions.can_remove_groceries),
            ],
        )?;
        Ok(changed == 1)
    }

    fn rejoin_membership(
        &self,
        membership_id: MembershipId,
        invited_by: &str,
        joined_at: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tribe_members
             SET invited_by = ?2, invited_at = ?3, accepted_at = ?3, left_at = NULL
             WHERE id = ?1
               AND left_at IS NOT NULL;",
            params![membership_id.to_string(), invited_by, joined_at],
        )?;
        Ok(changed == 1)
    }

    fn accept_membership(
        &self,
        membership_id: MembershipId,
        accepted_at: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tribe_members
             SET accepted_at = ?2
             WHERE id = ?1
               AND accepted_at IS NULL
               AND left_at IS NULL;",
            params![membership_id.to_string(), accepted_at],
        )?;
        Ok(changed == 1)
    }

    fn leave_membership(&self, membership_id: MembershipId, left_at: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tribe_members SET left_at = ?2 WHERE id = ?1 AND left_at IS NULL;",
            params![membership_id.to_string(), left_at],
        )?;
        Ok(changed == 1)
    }

    fn update_membership_settings(&self, membership: &Membership) -> RepoResult<()> {
        let permissions = &membership.permissions;
        let changed = self.conn.execute(
            "UPDATE tribe_members
             SET
                management_scope = ?2,
                proposal_notifs = ?3,
                digest_notifs = ?4,
                can_add_appointments = ?5,
                can_remove_appointments = ?6,
                can_add_tasks = ?7,
                can_remove_tasks = ?8,
                can_add_routines = ?9,
                can_remove_routines = ?10,
                can_add_groceries = ?11,
                can_remove_groceries = ?12
             WHERE id = ?1;",
            params![
                membership.id.to_string(),
                membership.management_scope.as_str(),
                bool_to_int(membership.proposal_notifs),
                bool_to_int(membership.digest_notifs),
                bool_to_int(permissions.can_add_appointments),
                bool_to_int(permissions.can_remove_appointments),
                bool_to_int(permissions.can_add_tasks),
                bool_to_int(permissions.can_remove_tasks),
                bool_to_int(permissions.can_add_routines),
                bool_to_int(permissions.can_remove_routines),
                bool_to_int(permissions.can_add_groceries),
                bool_to_int(permissions.can_remove_groceries),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "membership",
                id: membership.id.to_string(),
            });
        }
        Ok(())
    }

    fn set_last_read_messages_at(
        &self,
        membership_id: MembershipId,
        read_at: i64,
    ) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE tribe_members
             SET last_read_messages_at = MAX(COALESCE(last_read_messages_at, 0), ?2)
             WHERE id = ?1;",
            params![membership_id.to_string(), read_at],
        )?;
        Ok(())
    }

    fn list_memberships_for_user(&self, user_id: &str) -> RepoResult<Vec<(Tribe, Membership)>> {
        let sql = format!(
            "SELECT
                t.id, t.name, t.owner_id, t.tribe_type, t.deleted_at, t.created_at,
                {MEMBERSHIP_COLUMNS}
             FROM tribe_members m
             INNER JOIN tribes t ON t.id = m.tribe_id
             WHERE m.user_id = ?1
               AND m.left_at IS NULL
             ORDER BY t.created_at DESC, t.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([user_id])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push((parse_tribe_row(row, 0)?, parse_membership_row(row, 6)?));
        }
        Ok(result)
    }

    fn list_current_members(&self, tribe_id: TribeId) -> RepoResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS}
             FROM tribe_members m
             WHERE m.tribe_id = ?1
               AND m.left_at IS NULL
             ORDER BY m.invited_at ASC, m.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([tribe_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_membership_row(row, 0)?);
        }
        Ok(members)
    }

    fn count_active_members(&self, tribe_id: TribeId) -> RepoResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM tribe_members
             WHERE tribe_id = ?1
               AND accepted_at IS NOT NULL
               AND left_at IS NULL;",
            [tribe_id.to_string()],
            |row| row.get(0),
        )?;
        to_u32(count, "tribe_members count")
    }

    fn active_memberships_for_users(
        &self,
        tribe_id: TribeId,
        user_ids: &[String],
    ) -> RepoResult<HashMap<String, Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS}
             FROM tribe_members m
             WHERE m.tribe_id = ?1
               AND m.user_id = ?2
               AND m.accepted_at IS NOT NULL
               AND m.left_at IS NULL;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tribe_text = tribe_id.to_string();
        let mut found = HashMap::new();
        for user_id in user_ids {
            if found.contains_key(user_id) {
                continue;
            }
            let mut rows = stmt.query(params![tribe_text.as_str(), user_id.as_str()])?;
            if let Some(row) = rows.next()? {
                found.insert(user_id.clone(), parse_membership_row(row, 0)?);
            }
        }
        Ok(found)
    }

    fn digest_candidates(&self) -> RepoResult<Vec<DigestCandidate>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS}, t.name
             FROM tribe_members m
             INNER JOIN tribes t ON t.id = m.tribe_id
             WHERE t.deleted_at IS NULL
               AND m.accepted_at IS NOT NULL
               AND m.left_at IS NULL
               AND m.digest_notifs = 1
             ORDER BY m.tribe_id ASC, m.user_id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(DigestCandidate {
                membership: parse_membership_row(row, 0)?,
                tribe_name: row.get(MEMBERSHIP_COLUMN_COUNT)?,
            });
        }
        Ok(candidates)
    }

    fn insert_member_request(&self, request: &MemberRequest) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tribe_member_requests (
                id,
                tribe_id,
                requested_by,
                requested_user_id,
                state,
                created_at,
                reviewed_at,
                reviewed_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                request.id.to_string(),
                request.tribe_id.to_string(),
                request.requested_by.as_str(),
                request.requested_user_id.as_str(),
                request.state.as_str(),
                request.created_at,
                request.reviewed_at,
                request.reviewed_by.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn get_member_request(
        &self,
        request_id: MemberRequestId,
    ) -> RepoResult<Option<MemberRequest>> {
        let sql = format!("{MEMBER_REQUEST_SELECT_SQL} WHERE id = ?1;");
        self.conn
            .query_row(&sql, [request_id.to_string()], |row| Ok(read_request(row)))
            .optional()?
            .transpose()
    }

    fn review_member_request(
        &self,
        request_id: MemberRequestId,
        state: MemberRequestState,
        reviewed_by: &str,
        reviewed_at: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tribe_member_requests
             SET state = ?2, reviewed_by = ?3, reviewed_at = ?4
             WHERE id = ?1
               AND state = 'pending';",
            params![
                request_id.to_string(),
                state.as_str(),
                reviewed_by,
                reviewed_at
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_pending_requests(&self, tribe_id: TribeId) -> RepoResult<Vec<MemberRequest>> {
        let sql = format!(
            "{MEMBER_REQUEST_SELECT_SQL}
             WHERE tribe_id = ?1
               AND state = 'pending'
             ORDER BY created_at ASC, id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([tribe_id.to_string()])?;
        let mut requests = Vec::new();
        while let Some(row) = rows.next()? {
            requests.push(read_request(row)?);
        }
        Ok(requests)
    }
}

pub(crate) const MEMBERSHIP_COLUMN_COUNT: usize = 19;

pub(crate) fn insert_membership_row(conn: &Connection, membership: &Membership) -> RepoResult<()> {
    let permissions = &membership.permissions;
    conn.execute(
        "INSERT INTO tribe_members (
            id,
            tribe_id,
            user_id,
            invited_by,
            invited_at,
            accepted_at,
            left_at,
            management_scope,
            proposal_notifs,
            digest_notifs,
            last_read_messages_at,
            can_add_appointments,
            can_remove_appointments,
            can_add_tasks,
            can_remove_tasks,
            can_add_routines,
            can_remove_routines,
            can_add_groceries,
            can_remove_groceries
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19);",
        params![
            membership.id.to_string(),
            membership.tribe_id.to_string(),
            membership.user_id.as_str(),
            membership.invited_by.as_str(),
            membership.invited_at,
            membership.accepted_at,
            membership.left_at,
            membership.management_scope.as_str(),
            bool_to_int(membership.proposal_notifs),
            bool_to_int(membership.digest_notifs),
            membership.last_read_messages_at,
            bool_to_int(permissions.can_add_appointments),
            bool_to_int(permissions.can_remove_appointments),
            bool_to_int(permissions.can_add_tasks),
            bool_to_int(permissions.can_remove_tasks),
            bool_to_int(permissions.can_add_routines),
            bool_to_int(permissions.can_remove_routines),
            bool_to_int(permissions.can_add_groceries),
            bool_to_int(permissions.can_remove_groceries),
        ],
    )?;
    Ok(())
}

pub(crate) fn parse_tribe_row(row: &Row<'_>, offset: usize) -> RepoResult<Tribe> {
    let id_text: String = row.get(offset)?;
    let type_text: String = row.get(offset + 3)?;
    let tribe_type = TribeType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid tribe type `{type_text}` in tribes.tribe_type"))
    })?;
    Ok(Tribe {
        id: parse_uuid(&id_text, "tribes.id")?,
        name: row.get(offset + 1)?,
        owner_id: row.get(offset + 2)?,
        tribe_type,
        deleted_at: row.get(offset + 4)?,
        created_at: row.get(offset + 5)?,
    })
}

pub(crate) fn parse_membership_row(row: &Row<'_>, offset: usize) -> RepoResult<Membership> {
    let id_text: String = row.get(offset)?;
    let tribe_text: String = row.get(offset + 1)?;
    let scope_text: String = row.get(offset + 7)?;
    let management_scope = ManagementScope::parse(&scope_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid management scope `{scope_text}` in tribe_members.management_scope"
        ))
    })?;
    let flag = |index: usize, column: &str| -> RepoResult<bool> {
        int_to_bool(row.get(offset + index)?, column)
    };

    Ok(Membership {
        id: parse_uuid(&id_text, "tribe_members.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_members.tribe_id")?,
        user_id: row.get(offset + 2)?,
        invited_by: row.get(offset + 3)?,
        invited_at: row.get(offset + 4)?,
        accepted_at: row.get(offset + 5)?,
        left_at: row.get(offset + 6)?,
        management_scope,
        proposal_notifs: flag(8, "tribe_members.proposal_notifs")?,
        digest_notifs: flag(9, "tribe_members.digest_notifs")?,
        last_read_messages_at: row.get(offset + 10)?,
        permissions: PermissionSet {
            can_add_appointments: flag(11, "tribe_members.can_add_appointments")?,
            can_remove_appointments: flag(12, "tribe_members.can_remove_appointments")?,
            can_add_tasks: flag(13, "tribe_members.can_add_tasks")?,
            can_remove_tasks: flag(14, "tribe_members.can_remove_tasks")?,
            can_add_routines: flag(15, "tribe_members.can_add_routines")?,
            can_remove_routines: flag(16, "tribe_members.can_remove_routines")?,
            can_add_groceries: flag(17, "tribe_members.can_add_groceries")?,
            can_remove_groceries: flag(18, "tribe_members.can_remove_groceries")?,
        },
    })
}

fn read_request(row: &Row<'_>) -> RepoResult<MemberRequest> {
    let id_text: String = row.get(0)?;
    let tribe_text: String = row.get(1)?;
    let state_text: String = row.get(4)?;
    let state = MemberRequestState::parse(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid request state `{state_text}` in tribe_member_requests.state"
        ))
    })?;
    Ok(MemberRequest {
        id: parse_uuid(&id_text, "tribe_member_requests.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_member_requests.tribe_id")?,
        requested_by: row.get(2)?,
        requested_user_id: row.get(3)?,
        state,
        created_at: row.get(5)?,
        reviewed_at: row.get(6)?,
        reviewed_by: row.get(7)?,
    })
}
